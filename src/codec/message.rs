//! Typed protocol messages and their frame encoding.
//!
//! [`Message`] is a closed set of variants. Every variant except
//! `Init` and `Version` carries a correlation id as its first field.

use bytes::Bytes;

use super::attrs::{DirEntry, Extension, FileAttributes, Handle, OpenFlags};
use super::packet::{PacketReader, PacketWriter};
use crate::error::{Result, SftpError};
use crate::protocol::{packet_type, status, Frame};

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Init {
        version: u32,
        extensions: Vec<Extension>,
    },
    Version {
        version: u32,
        extensions: Vec<Extension>,
    },
    Open {
        id: u32,
        path: String,
        flags: OpenFlags,
        attrs: FileAttributes,
    },
    Close {
        id: u32,
        handle: Handle,
    },
    Read {
        id: u32,
        handle: Handle,
        offset: u64,
        len: u32,
    },
    Write {
        id: u32,
        handle: Handle,
        offset: u64,
        data: Bytes,
    },
    Lstat {
        id: u32,
        path: String,
    },
    Fstat {
        id: u32,
        handle: Handle,
    },
    OpenDir {
        id: u32,
        path: String,
    },
    ReadDir {
        id: u32,
        handle: Handle,
    },
    Remove {
        id: u32,
        path: String,
    },
    Mkdir {
        id: u32,
        path: String,
        attrs: FileAttributes,
    },
    Rmdir {
        id: u32,
        path: String,
    },
    RealPath {
        id: u32,
        path: String,
    },
    Stat {
        id: u32,
        path: String,
    },
    Rename {
        id: u32,
        from: String,
        to: String,
    },
    Status {
        id: u32,
        code: u32,
        message: String,
        language: String,
    },
    Handle {
        id: u32,
        handle: Handle,
    },
    Data {
        id: u32,
        data: Bytes,
    },
    Name {
        id: u32,
        entries: Vec<DirEntry>,
    },
    Attrs {
        id: u32,
        attrs: FileAttributes,
    },
}

impl Message {
    /// Build a STATUS message with an empty language tag.
    pub fn status(id: u32, code: u32, message: impl Into<String>) -> Self {
        Message::Status {
            id,
            code,
            message: message.into(),
            language: String::new(),
        }
    }

    /// Packet type discriminant.
    pub fn packet_type(&self) -> u8 {
        match self {
            Message::Init { .. } => packet_type::INIT,
            Message::Version { .. } => packet_type::VERSION,
            Message::Open { .. } => packet_type::OPEN,
            Message::Close { .. } => packet_type::CLOSE,
            Message::Read { .. } => packet_type::READ,
            Message::Write { .. } => packet_type::WRITE,
            Message::Lstat { .. } => packet_type::LSTAT,
            Message::Fstat { .. } => packet_type::FSTAT,
            Message::OpenDir { .. } => packet_type::OPENDIR,
            Message::ReadDir { .. } => packet_type::READDIR,
            Message::Remove { .. } => packet_type::REMOVE,
            Message::Mkdir { .. } => packet_type::MKDIR,
            Message::Rmdir { .. } => packet_type::RMDIR,
            Message::RealPath { .. } => packet_type::REALPATH,
            Message::Stat { .. } => packet_type::STAT,
            Message::Rename { .. } => packet_type::RENAME,
            Message::Status { .. } => packet_type::STATUS,
            Message::Handle { .. } => packet_type::HANDLE,
            Message::Data { .. } => packet_type::DATA,
            Message::Name { .. } => packet_type::NAME,
            Message::Attrs { .. } => packet_type::ATTRS,
        }
    }

    /// Variant name for logging and error messages.
    pub fn kind(&self) -> &'static str {
        packet_type::name(self.packet_type())
    }

    /// Correlation id, `None` for the handshake variants.
    pub fn request_id(&self) -> Option<u32> {
        match self {
            Message::Init { .. } | Message::Version { .. } => None,
            Message::Open { id, .. }
            | Message::Close { id, .. }
            | Message::Read { id, .. }
            | Message::Write { id, .. }
            | Message::Lstat { id, .. }
            | Message::Fstat { id, .. }
            | Message::OpenDir { id, .. }
            | Message::ReadDir { id, .. }
            | Message::Remove { id, .. }
            | Message::Mkdir { id, .. }
            | Message::Rmdir { id, .. }
            | Message::RealPath { id, .. }
            | Message::Stat { id, .. }
            | Message::Rename { id, .. }
            | Message::Status { id, .. }
            | Message::Handle { id, .. }
            | Message::Data { id, .. }
            | Message::Name { id, .. }
            | Message::Attrs { id, .. } => Some(*id),
        }
    }

    /// Stamp a correlation id. Returns `false` for variants without one.
    pub fn set_request_id(&mut self, new_id: u32) -> bool {
        match self {
            Message::Init { .. } | Message::Version { .. } => false,
            Message::Open { id, .. }
            | Message::Close { id, .. }
            | Message::Read { id, .. }
            | Message::Write { id, .. }
            | Message::Lstat { id, .. }
            | Message::Fstat { id, .. }
            | Message::OpenDir { id, .. }
            | Message::ReadDir { id, .. }
            | Message::Remove { id, .. }
            | Message::Mkdir { id, .. }
            | Message::Rmdir { id, .. }
            | Message::RealPath { id, .. }
            | Message::Stat { id, .. }
            | Message::Rename { id, .. }
            | Message::Status { id, .. }
            | Message::Handle { id, .. }
            | Message::Data { id, .. }
            | Message::Name { id, .. }
            | Message::Attrs { id, .. } => {
                *id = new_id;
                true
            }
        }
    }

    #[inline]
    pub fn is_correlatable(&self) -> bool {
        self.request_id().is_some()
    }

    /// Whether this is a STATUS with the given code.
    pub fn is_status(&self, expected: u32) -> bool {
        matches!(self, Message::Status { code, .. } if *code == expected)
    }

    /// Whether this is a successful STATUS.
    pub fn is_ok_status(&self) -> bool {
        self.is_status(status::OK)
    }
}

/// Encode a message into a frame.
///
/// # Errors
///
/// Returns a protocol error if a string field exceeds the 32-bit length
/// prefix, or the whole packet exceeds the 32-bit packet length.
pub fn encode(message: &Message) -> Result<Frame> {
    let mut w = PacketWriter::new();

    match message {
        Message::Init {
            version,
            extensions,
        }
        | Message::Version {
            version,
            extensions,
        } => {
            w.put_u32(*version);
            w.put_extensions(extensions)?;
        }
        Message::Open {
            id,
            path,
            flags,
            attrs,
        } => {
            w.put_u32(*id);
            w.put_str(path)?;
            w.put_u32(flags.bits());
            w.put_attrs(attrs)?;
        }
        Message::Close { id, handle }
        | Message::Fstat { id, handle }
        | Message::ReadDir { id, handle }
        | Message::Handle { id, handle } => {
            w.put_u32(*id);
            w.put_bytes(handle.as_bytes())?;
        }
        Message::Read {
            id,
            handle,
            offset,
            len,
        } => {
            w.put_u32(*id);
            w.put_bytes(handle.as_bytes())?;
            w.put_u64(*offset);
            w.put_u32(*len);
        }
        Message::Write {
            id,
            handle,
            offset,
            data,
        } => {
            w.put_u32(*id);
            w.put_bytes(handle.as_bytes())?;
            w.put_u64(*offset);
            w.put_bytes(data)?;
        }
        Message::Lstat { id, path }
        | Message::OpenDir { id, path }
        | Message::Remove { id, path }
        | Message::Rmdir { id, path }
        | Message::RealPath { id, path }
        | Message::Stat { id, path } => {
            w.put_u32(*id);
            w.put_str(path)?;
        }
        Message::Mkdir { id, path, attrs } => {
            w.put_u32(*id);
            w.put_str(path)?;
            w.put_attrs(attrs)?;
        }
        Message::Rename { id, from, to } => {
            w.put_u32(*id);
            w.put_str(from)?;
            w.put_str(to)?;
        }
        Message::Status {
            id,
            code,
            message,
            language,
        } => {
            w.put_u32(*id);
            w.put_u32(*code);
            w.put_str(message)?;
            w.put_str(language)?;
        }
        Message::Data { id, data } => {
            w.put_u32(*id);
            w.put_bytes(data)?;
        }
        Message::Name { id, entries } => {
            w.put_u32(*id);
            w.put_u32(entries.len() as u32);
            for entry in entries {
                w.put_str(&entry.filename)?;
                w.put_str(&entry.longname)?;
                w.put_attrs(&entry.attrs)?;
            }
        }
        Message::Attrs { id, attrs } => {
            w.put_u32(*id);
            w.put_attrs(attrs)?;
        }
    }

    Frame::try_new(message.packet_type(), w.finish())
}

/// Decode a frame into a message.
///
/// # Errors
///
/// Returns a protocol error for unknown packet types, truncated payloads,
/// invalid UTF-8 in request paths or trailing bytes. Server-supplied text
/// (NAME entries, STATUS message and language) is decoded lossily instead.
pub fn decode(frame: &Frame) -> Result<Message> {
    let kind = frame.type_name();
    let mut r = PacketReader::new(frame.payload.clone(), kind);

    let message = match frame.packet_type() {
        packet_type::INIT => Message::Init {
            version: r.get_u32()?,
            extensions: r.get_trailing_extensions()?,
        },
        packet_type::VERSION => Message::Version {
            version: r.get_u32()?,
            extensions: r.get_trailing_extensions()?,
        },
        packet_type::OPEN => Message::Open {
            id: r.get_u32()?,
            path: r.get_string()?,
            flags: OpenFlags::from_bits(r.get_u32()?),
            attrs: r.get_attrs()?,
        },
        packet_type::CLOSE => Message::Close {
            id: r.get_u32()?,
            handle: Handle::new(r.get_bytes()?),
        },
        packet_type::READ => Message::Read {
            id: r.get_u32()?,
            handle: Handle::new(r.get_bytes()?),
            offset: r.get_u64()?,
            len: r.get_u32()?,
        },
        packet_type::WRITE => Message::Write {
            id: r.get_u32()?,
            handle: Handle::new(r.get_bytes()?),
            offset: r.get_u64()?,
            data: r.get_bytes()?,
        },
        packet_type::LSTAT => Message::Lstat {
            id: r.get_u32()?,
            path: r.get_string()?,
        },
        packet_type::FSTAT => Message::Fstat {
            id: r.get_u32()?,
            handle: Handle::new(r.get_bytes()?),
        },
        packet_type::OPENDIR => Message::OpenDir {
            id: r.get_u32()?,
            path: r.get_string()?,
        },
        packet_type::READDIR => Message::ReadDir {
            id: r.get_u32()?,
            handle: Handle::new(r.get_bytes()?),
        },
        packet_type::REMOVE => Message::Remove {
            id: r.get_u32()?,
            path: r.get_string()?,
        },
        packet_type::MKDIR => Message::Mkdir {
            id: r.get_u32()?,
            path: r.get_string()?,
            attrs: r.get_attrs()?,
        },
        packet_type::RMDIR => Message::Rmdir {
            id: r.get_u32()?,
            path: r.get_string()?,
        },
        packet_type::REALPATH => Message::RealPath {
            id: r.get_u32()?,
            path: r.get_string()?,
        },
        packet_type::STAT => Message::Stat {
            id: r.get_u32()?,
            path: r.get_string()?,
        },
        packet_type::RENAME => Message::Rename {
            id: r.get_u32()?,
            from: r.get_string()?,
            to: r.get_string()?,
        },
        packet_type::STATUS => Message::Status {
            id: r.get_u32()?,
            code: r.get_u32()?,
            message: r.get_string_lossy()?,
            language: r.get_string_lossy()?,
        },
        packet_type::HANDLE => Message::Handle {
            id: r.get_u32()?,
            handle: Handle::new(r.get_bytes()?),
        },
        packet_type::DATA => Message::Data {
            id: r.get_u32()?,
            data: r.get_bytes()?,
        },
        packet_type::NAME => {
            let id = r.get_u32()?;
            let count = r.get_u32()?;
            // Each entry needs at least 12 bytes; cap the preallocation so
            // a hostile count cannot force a huge allocation.
            let mut entries = Vec::with_capacity((count as usize).min(frame.payload_len() / 12));
            for _ in 0..count {
                entries.push(DirEntry {
                    filename: r.get_string_lossy()?,
                    longname: r.get_string_lossy()?,
                    attrs: r.get_attrs()?,
                });
            }
            Message::Name { id, entries }
        }
        packet_type::ATTRS => Message::Attrs {
            id: r.get_u32()?,
            attrs: r.get_attrs()?,
        },
        other => {
            return Err(SftpError::Protocol(format!(
                "Unknown packet type {}",
                other
            )))
        }
    };

    r.finish()?;
    Ok(message)
}

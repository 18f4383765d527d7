//! Bounds-checked primitives for packet payloads.
//!
//! [`PacketWriter`] appends big-endian integers and length-prefixed strings
//! to a `BytesMut`. [`PacketReader`] consumes them from a `Bytes` payload,
//! returning a protocol error instead of panicking on truncated input.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::attrs::{attr_flags, Extension, FileAttributes};
use crate::error::{Result, SftpError};

pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
        }
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn put_bytes(&mut self, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| {
            SftpError::Protocol(format!("String of {} bytes is too long", data.len()))
        })?;
        self.buf.put_u32(len);
        self.buf.put_slice(data);
        Ok(())
    }

    pub fn put_str(&mut self, s: &str) -> Result<()> {
        self.put_bytes(s.as_bytes())
    }

    pub fn put_extensions(&mut self, extensions: &[Extension]) -> Result<()> {
        for ext in extensions {
            self.put_str(&ext.name)?;
            self.put_str(&ext.data)?;
        }
        Ok(())
    }

    pub fn put_attrs(&mut self, attrs: &FileAttributes) -> Result<()> {
        let flags = attrs.flags();
        self.put_u32(flags);
        if let Some(size) = attrs.size {
            self.put_u64(size);
        }
        if let (Some(uid), Some(gid)) = (attrs.uid, attrs.gid) {
            self.put_u32(uid);
            self.put_u32(gid);
        }
        if let Some(permissions) = attrs.permissions {
            self.put_u32(permissions);
        }
        if let (Some(atime), Some(mtime)) = (attrs.atime, attrs.mtime) {
            self.put_u32(atime);
            self.put_u32(mtime);
        }
        if flags & attr_flags::EXTENDED != 0 {
            self.put_u32(attrs.extended.len() as u32);
            self.put_extensions(&attrs.extended)?;
        }
        Ok(())
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

pub struct PacketReader {
    buf: Bytes,
    context: &'static str,
}

impl PacketReader {
    /// `context` names the packet in error messages.
    pub fn new(buf: Bytes, context: &'static str) -> Self {
        Self { buf, context }
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(SftpError::Protocol(format!(
                "Truncated {} packet: need {} bytes, have {}",
                self.context,
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    pub fn get_bytes(&mut self) -> Result<Bytes> {
        let len = self.get_u32()? as usize;
        self.need(len)?;
        Ok(self.buf.split_to(len))
    }

    pub fn get_string(&mut self) -> Result<String> {
        let raw = self.get_bytes()?;
        String::from_utf8(raw.to_vec()).map_err(|_| {
            SftpError::Protocol(format!("Invalid UTF-8 string in {} packet", self.context))
        })
    }

    /// Read a string whose bytes are not guaranteed to be UTF-8.
    ///
    /// Servers report file names in whatever encoding the file system
    /// holds; invalid sequences become U+FFFD instead of failing the packet.
    pub fn get_string_lossy(&mut self) -> Result<String> {
        let raw = self.get_bytes()?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Read name/data pairs until the payload is exhausted.
    pub fn get_trailing_extensions(&mut self) -> Result<Vec<Extension>> {
        let mut extensions = Vec::new();
        while self.buf.has_remaining() {
            let name = self.get_string()?;
            let data = self.get_string()?;
            extensions.push(Extension { name, data });
        }
        Ok(extensions)
    }

    pub fn get_attrs(&mut self) -> Result<FileAttributes> {
        let flags = self.get_u32()?;
        let mut attrs = FileAttributes::default();

        if flags & attr_flags::SIZE != 0 {
            attrs.size = Some(self.get_u64()?);
        }
        if flags & attr_flags::UIDGID != 0 {
            attrs.uid = Some(self.get_u32()?);
            attrs.gid = Some(self.get_u32()?);
        }
        if flags & attr_flags::PERMISSIONS != 0 {
            attrs.permissions = Some(self.get_u32()?);
        }
        if flags & attr_flags::ACMODTIME != 0 {
            attrs.atime = Some(self.get_u32()?);
            attrs.mtime = Some(self.get_u32()?);
        }
        if flags & attr_flags::EXTENDED != 0 {
            let count = self.get_u32()?;
            for _ in 0..count {
                let name = self.get_string()?;
                let data = self.get_string()?;
                attrs.extended.push(Extension { name, data });
            }
        }
        Ok(attrs)
    }

    /// Reject trailing bytes after the last field.
    pub fn finish(self) -> Result<()> {
        if self.buf.has_remaining() {
            return Err(SftpError::Protocol(format!(
                "{} trailing bytes after {} packet",
                self.buf.remaining(),
                self.context
            )));
        }
        Ok(())
    }
}

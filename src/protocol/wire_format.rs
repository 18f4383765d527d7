//! Wire format encoding and decoding.
//!
//! Every packet starts with a 5-byte header:
//! ```text
//! ┌──────────┬───────┬──────────────────────┐
//! │ Length   │ Type  │ Payload              │
//! │ 4 bytes  │ 1 byte│ Length - 1 bytes     │
//! │ uint32 BE│       │                      │
//! └──────────┴───────┴──────────────────────┘
//! ```
//!
//! The length counts the type byte plus the payload. All multi-byte
//! integers are Big Endian.

use crate::error::{Result, SftpError};

/// Header size in bytes (length + type).
pub const HEADER_SIZE: usize = 5;

/// Default maximum payload size (256 KiB).
pub const DEFAULT_MAX_PACKET_SIZE: u32 = 256 * 1024;

/// Protocol version requested during the handshake.
pub const SFTP_VERSION: u32 = 3;

/// Packet type discriminants.
pub mod packet_type {
    pub const INIT: u8 = 1;
    pub const VERSION: u8 = 2;
    pub const OPEN: u8 = 3;
    pub const CLOSE: u8 = 4;
    pub const READ: u8 = 5;
    pub const WRITE: u8 = 6;
    pub const LSTAT: u8 = 7;
    pub const FSTAT: u8 = 8;
    pub const OPENDIR: u8 = 11;
    pub const READDIR: u8 = 12;
    pub const REMOVE: u8 = 13;
    pub const MKDIR: u8 = 14;
    pub const RMDIR: u8 = 15;
    pub const REALPATH: u8 = 16;
    pub const STAT: u8 = 17;
    pub const RENAME: u8 = 18;
    pub const STATUS: u8 = 101;
    pub const HANDLE: u8 = 102;
    pub const DATA: u8 = 103;
    pub const NAME: u8 = 104;
    pub const ATTRS: u8 = 105;

    /// Human-readable name for logging.
    pub fn name(packet_type: u8) -> &'static str {
        match packet_type {
            INIT => "INIT",
            VERSION => "VERSION",
            OPEN => "OPEN",
            CLOSE => "CLOSE",
            READ => "READ",
            WRITE => "WRITE",
            LSTAT => "LSTAT",
            FSTAT => "FSTAT",
            OPENDIR => "OPENDIR",
            READDIR => "READDIR",
            REMOVE => "REMOVE",
            MKDIR => "MKDIR",
            RMDIR => "RMDIR",
            REALPATH => "REALPATH",
            STAT => "STAT",
            RENAME => "RENAME",
            STATUS => "STATUS",
            HANDLE => "HANDLE",
            DATA => "DATA",
            NAME => "NAME",
            ATTRS => "ATTRS",
            _ => "UNKNOWN",
        }
    }
}

/// Status codes carried by STATUS packets.
pub mod status {
    pub const OK: u32 = 0;
    pub const EOF: u32 = 1;
    pub const NO_SUCH_FILE: u32 = 2;
    pub const PERMISSION_DENIED: u32 = 3;
    pub const FAILURE: u32 = 4;
    pub const BAD_MESSAGE: u32 = 5;
    pub const NO_CONNECTION: u32 = 6;
    pub const CONNECTION_LOST: u32 = 7;
    pub const OP_UNSUPPORTED: u32 = 8;
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Packet type (see `packet_type` module).
    pub packet_type: u8,
    /// Payload length in bytes, excluding the type byte.
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new header.
    pub fn new(packet_type: u8, payload_length: u32) -> Self {
        Self {
            packet_type,
            payload_length,
        }
    }

    /// Header for a payload of `len` bytes.
    ///
    /// # Errors
    ///
    /// [`SftpError::Protocol`] if the payload plus the type byte does not
    /// fit the 32-bit length field.
    pub fn for_payload(packet_type: u8, len: usize) -> Result<Self> {
        match u32::try_from(len) {
            Ok(payload_length) if payload_length < u32::MAX => {
                Ok(Self::new(packet_type, payload_length))
            }
            _ => Err(SftpError::Protocol(format!(
                "Payload of {} bytes does not fit the packet length field",
                len
            ))),
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use sftp_client::protocol::{packet_type, FrameHeader};
    ///
    /// let header = FrameHeader::new(packet_type::INIT, 4);
    /// assert_eq!(header.encode(), [0, 0, 0, 5, 1]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.payload_length.saturating_add(1).to_be_bytes());
        buf[4] = self.packet_type;
        buf
    }

    /// Decode header from bytes.
    ///
    /// Returns `Ok(None)` if the buffer is too short, and an error if the
    /// length field is zero (no room for the type byte).
    pub fn decode(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if length == 0 {
            return Err(SftpError::Protocol("Packet length 0 is invalid".to_string()));
        }
        Ok(Some(Self {
            packet_type: buf[4],
            payload_length: length - 1,
        }))
    }

    /// Check the payload length against a maximum.
    pub fn validate(&self, max_packet_size: u32) -> Result<()> {
        if self.payload_length > max_packet_size {
            return Err(SftpError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_packet_size
            )));
        }
        Ok(())
    }
}

//! Frame struct: one length-delimited packet, pre-decode / post-encode.
//!
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use sftp_client::protocol::{packet_type, Frame};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(packet_type::HANDLE, Bytes::from_static(b"hello"));
//! assert_eq!(frame.packet_type(), packet_type::HANDLE);
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{packet_type, FrameHeader, HEADER_SIZE};
use crate::error::Result;

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: FrameHeader,
    /// Payload bytes, excluding the type byte.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame from a packet type and payload.
    ///
    /// The payload must be shorter than `u32::MAX` bytes; use
    /// [`Frame::try_new`] when its size is not known to be small.
    pub fn new(packet_type: u8, payload: Bytes) -> Self {
        debug_assert!(payload.len() < u32::MAX as usize);
        Self {
            header: FrameHeader::new(packet_type, payload.len() as u32),
            payload,
        }
    }

    /// Create a frame, rejecting payloads the length field cannot describe.
    pub fn try_new(packet_type: u8, payload: Bytes) -> Result<Self> {
        let header = FrameHeader::for_payload(packet_type, payload.len())?;
        Ok(Self { header, payload })
    }

    /// Create a frame from an already decoded header.
    pub fn from_header(header: FrameHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    #[inline]
    pub fn packet_type(&self) -> u8 {
        self.header.packet_type
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Total encoded size (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Packet type name for logging.
    pub fn type_name(&self) -> &'static str {
        packet_type::name(self.header.packet_type)
    }

    /// Encode into a single contiguous buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameBuffer;

    #[test]
    fn test_frame_creation() {
        let frame = Frame::new(packet_type::DATA, Bytes::from_static(b"hello"));

        assert_eq!(frame.packet_type(), packet_type::DATA);
        assert_eq!(frame.header.payload_length, 5);
        assert_eq!(frame.payload_len(), 5);
        assert_eq!(frame.size(), HEADER_SIZE + 5);
        assert_eq!(frame.type_name(), "DATA");
    }

    #[test]
    fn test_to_vec_layout() {
        let frame = Frame::new(packet_type::INIT, Bytes::from_static(&[0, 0, 0, 3]));
        assert_eq!(frame.to_vec(), vec![0, 0, 0, 5, 1, 0, 0, 0, 3]);
    }

    #[test]
    fn test_to_vec_parses_back() {
        let frame = Frame::new(packet_type::STATUS, Bytes::from_static(b"0123456789"));
        let bytes = frame.to_vec();

        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&bytes).unwrap();

        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn test_payload_shares_memory() {
        let original = Bytes::from_static(b"test data");
        let frame = Frame::new(packet_type::DATA, original.clone());
        assert_eq!(frame.payload.as_ptr(), original.as_ptr());
    }

    #[test]
    fn test_try_new_matches_new() {
        let payload = Bytes::from_static(b"abc");
        let frame = Frame::try_new(packet_type::DATA, payload.clone()).unwrap();
        assert_eq!(frame, Frame::new(packet_type::DATA, payload));
    }
}

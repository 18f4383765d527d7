//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 5 bytes
//! - `WaitingForPayload`: Header parsed, need N more payload bytes

use bytes::{Bytes, BytesMut};

use super::wire_format::{FrameHeader, DEFAULT_MAX_PACKET_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::Result;

/// Default initial buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone)]
enum State {
    WaitingForHeader,
    WaitingForPayload { header: FrameHeader },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_packet_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    pub fn new() -> Self {
        Self::with_max_packet(DEFAULT_MAX_PACKET_SIZE)
    }

    /// Create a new frame buffer with a custom max payload size.
    pub fn with_max_packet(max_packet_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(DEFAULT_BUFFER_CAPACITY),
            state: State::WaitingForHeader,
            max_packet_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if a header is malformed or announces a
    /// payload above the configured maximum. The buffer is unusable
    /// afterwards.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        loop {
            match &self.state {
                State::WaitingForHeader => {
                    let header = match FrameHeader::decode(&self.buffer)? {
                        Some(header) => header,
                        None => return Ok(None),
                    };
                    header.validate(self.max_packet_size)?;

                    let _ = self.buffer.split_to(HEADER_SIZE);
                    self.state = State::WaitingForPayload { header };
                }

                State::WaitingForPayload { header } => {
                    let remaining = header.payload_length as usize;
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let payload = if remaining == 0 {
                        Bytes::new()
                    } else {
                        self.buffer.split_to(remaining).freeze()
                    };
                    let header = *header;
                    self.state = State::WaitingForHeader;

                    return Ok(Some(Frame::from_header(header, payload)));
                }
            }
        }
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet_type;

    fn make_frame_bytes(packet_type: u8, payload: &[u8]) -> Vec<u8> {
        Frame::new(packet_type, Bytes::copy_from_slice(payload)).to_vec()
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let bytes = make_frame_bytes(packet_type::HANDLE, b"hello");

        let frames = buffer.push(&bytes).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].packet_type(), packet_type::HANDLE);
        assert_eq!(frames[0].payload(), b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = make_frame_bytes(packet_type::STATUS, b"first");
        combined.extend(make_frame_bytes(packet_type::HANDLE, b"second"));
        combined.extend(make_frame_bytes(packet_type::NAME, b"third"));

        let frames = buffer.push(&combined).unwrap();

        let types: Vec<u8> = frames.iter().map(|f| f.packet_type()).collect();
        assert_eq!(
            types,
            vec![packet_type::STATUS, packet_type::HANDLE, packet_type::NAME]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_header() {
        let mut buffer = FrameBuffer::new();
        let bytes = make_frame_bytes(packet_type::DATA, b"test");

        assert!(buffer.push(&bytes[..3]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");

        let frames = buffer.push(&bytes[3..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"test");
    }

    #[test]
    fn test_fragmented_payload() {
        let mut buffer = FrameBuffer::new();
        let payload = b"this is a longer payload that will be fragmented";
        let bytes = make_frame_bytes(packet_type::DATA, payload);

        let partial = HEADER_SIZE + 10;
        assert!(buffer.push(&bytes[..partial]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        let frames = buffer.push(&bytes[partial..]).unwrap();
        assert_eq!(frames[0].payload(), payload);
        assert_eq!(buffer.state_name(), "WaitingForHeader");
    }

    #[test]
    fn test_empty_payload() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&make_frame_bytes(packet_type::INIT, b"")).unwrap();

        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn test_max_packet_validation() {
        let mut buffer = FrameBuffer::with_max_packet(100);
        let header = FrameHeader::new(packet_type::DATA, 1000);

        let result = buffer.push(&header.encode());
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_zero_length_rejected() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(&[0, 0, 0, 0, 2]).is_err());
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut buffer = FrameBuffer::new();

        let first = make_frame_bytes(packet_type::STATUS, b"first");
        let second = make_frame_bytes(packet_type::HANDLE, b"second");

        let mut data = first.clone();
        data.extend_from_slice(&second[..7]);

        let frames = buffer.push(&data).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        let frames = buffer.push(&second[7..]).unwrap();
        assert_eq!(frames[0].payload(), b"second");
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let bytes = make_frame_bytes(packet_type::DATA, b"hi");

        let mut all_frames = Vec::new();
        for byte in &bytes {
            all_frames.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all_frames.len(), 1);
        assert_eq!(all_frames[0].payload(), b"hi");
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        let bytes = make_frame_bytes(packet_type::DATA, b"test");
        buffer.push(&bytes[..HEADER_SIZE + 1]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        buffer.clear();

        assert_eq!(buffer.state_name(), "WaitingForHeader");
        assert!(buffer.is_empty());
    }
}

//! Protocol module - wire format and framing.
//!
//! - 5-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Packet type and status code constants

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::Frame;
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    packet_type, status, FrameHeader, DEFAULT_MAX_PACKET_SIZE, HEADER_SIZE, SFTP_VERSION,
};

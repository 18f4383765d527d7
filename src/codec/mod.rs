//! Codec module - typed messages and their binary encoding.
//!
//! - [`Message`] - closed set of protocol variants
//! - [`encode`] / [`decode`] - `Message` <-> [`Frame`](crate::protocol::Frame)
//! - value types: [`Handle`], [`OpenFlags`], [`FileAttributes`], [`DirEntry`]
//!
//! # Example
//!
//! ```
//! use sftp_client::codec::{decode, encode, Message};
//!
//! let request = Message::OpenDir { id: 1, path: "/tmp".to_string() };
//! let frame = encode(&request).unwrap();
//! assert_eq!(decode(&frame).unwrap(), request);
//! ```

mod attrs;
mod message;
mod packet;

pub use attrs::{attr_flags, DirEntry, Extension, FileAttributes, Handle, OpenFlags};
pub use message::{decode, encode, Message};

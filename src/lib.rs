//! # sftp-client
//!
//! Asynchronous SFTP v3 client engine over any duplex byte stream.
//!
//! Many requests share one connection and their responses may arrive in any
//! order. The crate handles the correlation: each request gets an id, the
//! dispatcher routes every response back to the caller waiting on that id,
//! and a failed connection fails every pending request at once.
//!
//! ## Architecture
//!
//! - **Reader / writer pumps** move frames between the stream and two
//!   bounded queues
//! - **Dispatcher** runs the INIT/VERSION handshake, then decodes inbound
//!   frames and hands them to the router
//! - **Router** owns the id → waiting-caller table
//! - **Client** is the public operation surface
//!
//! The stream itself (SSH channel, subprocess pipes, socket) is supplied by
//! the caller already connected.
//!
//! ## Example
//!
//! ```no_run
//! use sftp_client::{ClientBuilder, OpenFlags, FileAttributes};
//!
//! # async fn demo(
//! #     reader: tokio::io::DuplexStream,
//! #     writer: tokio::io::DuplexStream,
//! # ) -> sftp_client::Result<()> {
//! let client = ClientBuilder::new()
//!     .outbound_capacity(128)
//!     .connect(reader, writer)
//!     .await?;
//!
//! let handle = client
//!     .open("/etc/hostname", OpenFlags::READ, FileAttributes::empty())
//!     .await?;
//! if let Some(data) = client.read(&handle, 0, 4096).await? {
//!     println!("{}", String::from_utf8_lossy(&data));
//! }
//! client.close(&handle).await?;
//! client.close_session().await
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod protocol;
pub mod router;
pub mod transport;

mod client;
mod session;

pub use client::{Client, ClientBuilder};
pub use codec::{DirEntry, FileAttributes, Handle, OpenFlags};
pub use error::{Result, SftpError};
pub use session::Phase;

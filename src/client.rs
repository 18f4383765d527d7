//! Client builder and request façade.
//!
//! The [`ClientBuilder`] configures the transport and performs the
//! handshake. The [`Client`] exposes the file operations; every one of them
//! is the same three steps:
//! 1. Build the request message
//! 2. Reserve an id, stamp it and queue the encoded frame
//! 3. Await the response slot and interpret the reply
//!
//! # Example
//!
//! ```no_run
//! use sftp_client::Client;
//!
//! # async fn demo(stream: tokio::io::DuplexStream) -> sftp_client::Result<()> {
//! let client = Client::connect(stream).await?;
//! for entry in client.read_dir_all("/tmp").await? {
//!     println!("{}", entry.filename);
//! }
//! client.close_session().await
//! # }
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::codec::{encode, DirEntry, FileAttributes, Handle, Message, OpenFlags};
use crate::error::{Result, SftpError};
use crate::protocol::{status, SFTP_VERSION};
use crate::router::{ResponseSlot, Router};
use crate::session::{Dispatcher, Phase};
use crate::transport::{OutboundQueue, TransportConfig};

/// Builder for configuring and connecting a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    version: u32,
    transport: TransportConfig,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            version: SFTP_VERSION,
            transport: TransportConfig::default(),
        }
    }

    /// Protocol version sent in INIT. The server must answer with the same.
    ///
    /// Default: 3
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Set the outbound queue capacity.
    ///
    /// Requests issued while the queue is full wait for the writer.
    /// Default: 64
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.transport.outbound_capacity = capacity;
        self
    }

    /// Set the inbound queue capacity.
    ///
    /// Default: 64
    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.transport.inbound_capacity = capacity;
        self
    }

    /// Set the largest packet payload accepted from the server.
    ///
    /// Default: 256 KiB
    pub fn max_packet_size(mut self, size: u32) -> Self {
        self.transport.max_packet_size = size;
        self
    }

    /// Default: 64 KiB
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.transport.read_buffer_size = size;
        self
    }

    /// Connect over separate read and write halves.
    ///
    /// This will:
    /// 1. Spawn the reader and writer pumps
    /// 2. Send INIT and wait for VERSION
    /// 3. Spawn the dispatcher loop
    ///
    /// # Errors
    ///
    /// [`SftpError::Handshake`] on a version mismatch or unexpected first
    /// message, or the transport error that interrupted the exchange. The
    /// pumps are joined before the error is returned.
    pub async fn connect<R, W>(self, reader: R, writer: W) -> Result<Client>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut dispatcher = Dispatcher::start(reader, writer, &self.transport);

        let version = match dispatcher.handshake(self.version).await {
            Ok(version) => version,
            Err(e) => {
                tracing::error!("Handshake failed: {}", e);
                dispatcher.teardown(&e).await;
                return Err(e);
            }
        };

        let router = dispatcher.router();
        let outbound = dispatcher.outbound();
        let phase = dispatcher.subscribe();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(dispatcher.run(shutdown_rx));

        Ok(Client {
            router,
            outbound,
            phase,
            version,
            shutdown: shutdown_tx,
            dispatcher: task,
        })
    }

    /// Connect over a single duplex stream.
    pub async fn connect_stream<S>(self, stream: S) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        self.connect(reader, writer).await
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected, handshaken SFTP session.
///
/// Operations take `&self` and may run concurrently; responses are matched
/// to callers by request id regardless of arrival order. Dropping the
/// client closes the session.
pub struct Client {
    router: Arc<Router>,
    outbound: Arc<OutboundQueue>,
    phase: watch::Receiver<Phase>,
    version: u32,
    /// Dropped or fired to ask the dispatcher to close.
    shutdown: oneshot::Sender<()>,
    dispatcher: JoinHandle<Result<()>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect with default settings over a duplex stream.
    pub async fn connect<S>(stream: S) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        ClientBuilder::new().connect_stream(stream).await
    }

    /// Negotiated protocol version.
    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Whether new requests are still accepted.
    pub fn is_usable(&self) -> bool {
        self.phase().is_ready()
    }

    /// Requests sent and still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.router.pending_count()
    }

    /// Frames queued for the writer and not yet written.
    pub fn pending_frames(&self) -> usize {
        self.outbound.pending_count()
    }

    /// Wait until the session has fully closed.
    pub async fn closed(&self) {
        let mut phase = self.phase.clone();
        loop {
            if *phase.borrow_and_update() == Phase::Closed {
                return;
            }
            if phase.changed().await.is_err() {
                return;
            }
        }
    }

    /// Close the session and join every task.
    ///
    /// Pending requests fail with [`SftpError::Shutdown`]. Returns the fatal
    /// error that ended the session, if it ended on its own first.
    pub async fn close_session(self) -> Result<()> {
        let Client {
            shutdown,
            dispatcher,
            ..
        } = self;
        let _ = shutdown.send(());
        join_dispatcher(dispatcher).await
    }

    /// Wait for the session to end on its own, without closing it.
    pub async fn wait(self) -> Result<()> {
        let Client {
            shutdown,
            dispatcher,
            ..
        } = self;
        let result = join_dispatcher(dispatcher).await;
        drop(shutdown);
        result
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.phase() {
            Phase::Ready => Ok(()),
            phase => Err(SftpError::Shutdown(
                self.router
                    .abort_reason()
                    .unwrap_or_else(|| format!("session is {}", phase)),
            )),
        }
    }

    /// Stamp a fresh id on `message` and queue it.
    ///
    /// The id is released again if the frame never reaches the queue.
    async fn send(&self, mut message: Message) -> Result<ResponseSlot> {
        self.ensure_ready()?;

        let (id, slot) = self.router.reserve()?;
        if !message.set_request_id(id) {
            self.router.release(id);
            return Err(SftpError::Protocol(format!(
                "{} carries no request id",
                message.kind()
            )));
        }

        let queued = match encode(&message) {
            Ok(frame) => self.outbound.push(frame).await,
            Err(e) => Err(e),
        };
        if let Err(e) = queued {
            self.router.release(id);
            return Err(e);
        }

        tracing::debug!("Sent {} as request {}", message.kind(), id);
        Ok(slot)
    }

    /// Send `request` and interpret the reply.
    ///
    /// `accept` returns the reply back when it is not a success variant for
    /// this operation; an error STATUS then becomes [`SftpError::Operation`]
    /// and anything else a protocol error.
    async fn round_trip<T, F>(&self, request: Message, accept: F) -> Result<T>
    where
        F: FnOnce(Message) -> std::result::Result<T, Message>,
    {
        let slot = self.send(request).await?;
        let reply = slot.recv().await?;
        accept(reply).map_err(rejected)
    }

    async fn expect_ok(&self, request: Message) -> Result<()> {
        self.round_trip(request, |reply| match reply {
            Message::Status { code, .. } if code == status::OK => Ok(()),
            other => Err(other),
        })
        .await
    }

    async fn expect_handle(&self, request: Message) -> Result<Handle> {
        self.round_trip(request, |reply| match reply {
            Message::Handle { handle, .. } => Ok(handle),
            other => Err(other),
        })
        .await
    }

    async fn expect_attrs(&self, request: Message) -> Result<FileAttributes> {
        self.round_trip(request, |reply| match reply {
            Message::Attrs { attrs, .. } => Ok(attrs),
            other => Err(other),
        })
        .await
    }

    /// Open a directory for listing.
    pub async fn open_dir(&self, path: &str) -> Result<Handle> {
        self.expect_handle(Message::OpenDir {
            id: 0,
            path: path.to_string(),
        })
        .await
    }

    /// Read the next batch of entries. An empty batch means the listing is
    /// exhausted.
    pub async fn read_dir(&self, handle: &Handle) -> Result<Vec<DirEntry>> {
        let request = Message::ReadDir {
            id: 0,
            handle: handle.clone(),
        };
        self.round_trip(request, |reply| match reply {
            Message::Name { entries, .. } => Ok(entries),
            Message::Status { code, .. } if code == status::EOF => Ok(Vec::new()),
            other => Err(other),
        })
        .await
    }

    /// List a whole directory: open, read until EOF, close.
    ///
    /// The handle is closed even when a read fails.
    pub async fn read_dir_all(&self, path: &str) -> Result<Vec<DirEntry>> {
        let handle = self.open_dir(path).await?;

        let mut entries = Vec::new();
        let listed = loop {
            match self.read_dir(&handle).await {
                Ok(batch) if batch.is_empty() => break Ok(()),
                Ok(batch) => entries.extend(batch),
                Err(e) => break Err(e),
            }
        };
        let closed = self.close(&handle).await;

        listed?;
        closed?;
        Ok(entries)
    }

    pub async fn open(&self, path: &str, flags: OpenFlags, attrs: FileAttributes) -> Result<Handle> {
        self.expect_handle(Message::Open {
            id: 0,
            path: path.to_string(),
            flags,
            attrs,
        })
        .await
    }

    /// Close a file or directory handle.
    pub async fn close(&self, handle: &Handle) -> Result<()> {
        self.expect_ok(Message::Close {
            id: 0,
            handle: handle.clone(),
        })
        .await
    }

    /// Read up to `len` bytes at `offset`. `None` at end of file.
    pub async fn read(&self, handle: &Handle, offset: u64, len: u32) -> Result<Option<Bytes>> {
        let request = Message::Read {
            id: 0,
            handle: handle.clone(),
            offset,
            len,
        };
        self.round_trip(request, |reply| match reply {
            Message::Data { data, .. } => Ok(Some(data)),
            Message::Status { code, .. } if code == status::EOF => Ok(None),
            other => Err(other),
        })
        .await
    }

    pub async fn write(&self, handle: &Handle, offset: u64, data: Bytes) -> Result<()> {
        self.expect_ok(Message::Write {
            id: 0,
            handle: handle.clone(),
            offset,
            data,
        })
        .await
    }

    /// Attributes of `path`, following symlinks.
    pub async fn stat(&self, path: &str) -> Result<FileAttributes> {
        self.expect_attrs(Message::Stat {
            id: 0,
            path: path.to_string(),
        })
        .await
    }

    /// Attributes of `path` itself, not following symlinks.
    pub async fn lstat(&self, path: &str) -> Result<FileAttributes> {
        self.expect_attrs(Message::Lstat {
            id: 0,
            path: path.to_string(),
        })
        .await
    }

    pub async fn fstat(&self, handle: &Handle) -> Result<FileAttributes> {
        self.expect_attrs(Message::Fstat {
            id: 0,
            handle: handle.clone(),
        })
        .await
    }

    pub async fn remove(&self, path: &str) -> Result<()> {
        self.expect_ok(Message::Remove {
            id: 0,
            path: path.to_string(),
        })
        .await
    }

    pub async fn mkdir(&self, path: &str, attrs: FileAttributes) -> Result<()> {
        self.expect_ok(Message::Mkdir {
            id: 0,
            path: path.to_string(),
            attrs,
        })
        .await
    }

    pub async fn rmdir(&self, path: &str) -> Result<()> {
        self.expect_ok(Message::Rmdir {
            id: 0,
            path: path.to_string(),
        })
        .await
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.expect_ok(Message::Rename {
            id: 0,
            from: from.to_string(),
            to: to.to_string(),
        })
        .await
    }

    /// Canonical absolute form of `path`.
    pub async fn realpath(&self, path: &str) -> Result<String> {
        let request = Message::RealPath {
            id: 0,
            path: path.to_string(),
        };
        let entries = self
            .round_trip(request, |reply| match reply {
                Message::Name { entries, .. } => Ok(entries),
                other => Err(other),
            })
            .await?;

        entries
            .into_iter()
            .next()
            .map(|entry| entry.filename)
            .ok_or_else(|| SftpError::Protocol("empty NAME in reply to REALPATH".to_string()))
    }
}

/// Map a reply that is not the operation's success variant to an error.
fn rejected(reply: Message) -> SftpError {
    match reply {
        Message::Status { code, message, .. } if code != status::OK => {
            SftpError::Operation { code, message }
        }
        other => SftpError::Protocol(format!("unexpected response: {}", other.kind())),
    }
}

async fn join_dispatcher(task: JoinHandle<Result<()>>) -> Result<()> {
    match task.await {
        Ok(result) => result,
        Err(e) => Err(SftpError::Transport(std::io::Error::other(format!(
            "dispatcher task failed: {}",
            e
        )))),
    }
}

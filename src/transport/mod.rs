//! Transport module - the two pumps between the byte stream and the
//! in-process queues.
//!
//! Both pumps run as tasks inside one [`PumpGroup`]. The group yields each
//! pump's [`PumpOutcome`] exactly once, and tearing the session down means
//! joining the group until it is empty.

mod reader;
mod writer;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::error::SftpError;
use crate::protocol::{Frame, FrameBuffer, DEFAULT_MAX_PACKET_SIZE};

pub use reader::{DEFAULT_INBOUND_CAPACITY, DEFAULT_READ_BUFFER_SIZE};
pub use writer::{OutboundFrame, OutboundQueue, DEFAULT_OUTBOUND_CAPACITY};

/// Queue and buffer sizing for the two pumps.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Frames the outbound queue holds before `push` waits.
    pub outbound_capacity: usize,
    /// Frames the reader may publish ahead of the dispatcher.
    pub inbound_capacity: usize,
    /// Largest accepted payload of an incoming packet.
    pub max_packet_size: u32,
    pub read_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// Which pump produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
    Reader,
    Writer,
}

/// How a pump stopped.
#[derive(Debug)]
pub enum PumpOutcome {
    /// Stopped on request: outbound queue closed, or reader told to stop.
    Finished,
    /// The peer closed its side of the stream.
    PeerClosed,
    /// Stream or framing error.
    Failed(SftpError),
}

impl PumpOutcome {
    #[inline]
    pub fn is_clean(&self) -> bool {
        matches!(self, PumpOutcome::Finished)
    }

    /// Error describing why the session has to close after this outcome.
    pub fn into_error(self, pump: Pump) -> SftpError {
        match self {
            PumpOutcome::Failed(e) => e,
            PumpOutcome::PeerClosed => SftpError::Shutdown("connection closed by peer".to_string()),
            PumpOutcome::Finished => SftpError::Shutdown(format!("{:?} pump stopped", pump)),
        }
    }
}

/// Supervised group owning the reader and writer pump tasks.
pub struct PumpGroup {
    tasks: JoinSet<(Pump, PumpOutcome)>,
    reader_stop: Option<oneshot::Sender<()>>,
    writer_stop: Option<oneshot::Sender<()>>,
}

impl PumpGroup {
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            reader_stop: None,
            writer_stop: None,
        }
    }

    /// Spawn the writer pump and return the queue that feeds it.
    pub fn spawn_writer<W>(&mut self, writer: W, capacity: usize) -> OutboundQueue
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel();
        self.writer_stop = Some(stop_tx);

        let (queue, pump) = writer::writer_pump(writer, capacity, stop_rx);
        self.tasks.spawn(async move {
            let outcome = pump.await;
            tracing::info!("Writer pump exited: {:?}", outcome);
            (Pump::Writer, outcome)
        });
        queue
    }

    /// Spawn the reader pump and return the inbound queue it fills.
    pub fn spawn_reader<R>(&mut self, reader: R, config: &TransportConfig) -> mpsc::Receiver<Frame>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();
        self.reader_stop = Some(stop_tx);

        let frames = FrameBuffer::with_max_packet(config.max_packet_size);
        let read_buffer_size = config.read_buffer_size;
        self.tasks.spawn(async move {
            let outcome = reader::reader_loop(reader, tx, stop_rx, frames, read_buffer_size).await;
            tracing::info!("Reader pump exited: {:?}", outcome);
            (Pump::Reader, outcome)
        });
        rx
    }

    /// Ask the reader pump to stop. This is the read-side close.
    pub fn stop_reader(&mut self) {
        if let Some(stop) = self.reader_stop.take() {
            let _ = stop.send(());
        }
    }

    /// Ask the writer pump to stop without draining its queue.
    ///
    /// Unlike closing the queue, this also ends a write the peer is not
    /// reading.
    pub fn stop_writer(&mut self) {
        if let Some(stop) = self.writer_stop.take() {
            let _ = stop.send(());
        }
    }

    /// Stop both pumps.
    pub fn stop(&mut self) {
        self.stop_reader();
        self.stop_writer();
    }

    /// Wait for the next pump to exit. `None` once every pump has been
    /// joined.
    pub async fn next_exit(&mut self) -> Option<(Pump, PumpOutcome)> {
        let joined = self.tasks.join_next().await?;
        Some(joined.unwrap_or_else(|e| {
            let err = std::io::Error::other(format!("pump task failed: {}", e));
            // A panicked or cancelled task no longer knows which pump it was.
            (Pump::Writer, PumpOutcome::Failed(SftpError::Transport(err)))
        }))
    }

    /// Join every remaining pump.
    pub async fn join_all(&mut self) -> Vec<(Pump, PumpOutcome)> {
        let mut exits = Vec::new();
        while let Some(exit) = self.next_exit().await {
            exits.push(exit);
        }
        exits
    }

    /// Number of pumps still running or not yet joined.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Default for PumpGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet_type;
    use bytes::Bytes;
    use tokio::io::duplex;

    fn small_config() -> TransportConfig {
        TransportConfig {
            inbound_capacity: 4,
            max_packet_size: 1024,
            read_buffer_size: 64,
            ..TransportConfig::default()
        }
    }

    #[tokio::test]
    async fn test_each_outcome_yielded_once() {
        let (client, server) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(client);

        let mut pumps = PumpGroup::new();
        let queue = pumps.spawn_writer(write_half, 4);
        let _inbound = pumps.spawn_reader(read_half, &small_config());
        assert_eq!(pumps.len(), 2);

        queue.close();
        pumps.stop_reader();

        let mut exits = pumps.join_all().await;
        exits.sort_by_key(|(pump, _)| *pump as u8);
        assert_eq!(exits.len(), 2);
        assert_eq!(exits[0].0, Pump::Reader);
        assert_eq!(exits[1].0, Pump::Writer);
        assert!(exits.iter().all(|(_, outcome)| outcome.is_clean()));

        assert!(pumps.is_empty());
        assert!(pumps.next_exit().await.is_none());
        drop(server);
    }

    #[tokio::test]
    async fn test_peer_close_reported_by_reader() {
        let (client, server) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(client);

        let mut pumps = PumpGroup::new();
        let queue = pumps.spawn_writer(write_half, 4);
        let _inbound = pumps.spawn_reader(read_half, &small_config());

        drop(server);

        let (pump, outcome) = pumps.next_exit().await.unwrap();
        assert_eq!(pump, Pump::Reader);
        assert!(matches!(outcome, PumpOutcome::PeerClosed));

        queue.close();
        let rest = pumps.join_all().await;
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].0, Pump::Writer);
    }

    #[test]
    fn test_outcome_into_error() {
        let err = PumpOutcome::PeerClosed.into_error(Pump::Reader);
        assert!(matches!(err, SftpError::Shutdown(ref m) if m.contains("closed by peer")));

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "boom");
        let err = PumpOutcome::Failed(io.into()).into_error(Pump::Writer);
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_outbound_frame_reaches_peer() {
        use tokio::io::AsyncReadExt;

        let (client, mut server) = duplex(1024);
        let mut pumps = PumpGroup::new();
        let queue = pumps.spawn_writer(client, 4);

        let frame = Frame::new(packet_type::INIT, Bytes::from_static(&[0, 0, 0, 3]));
        queue.push(frame.clone()).await.unwrap();
        queue.close();
        pumps.join_all().await;

        let mut written = Vec::new();
        server.read_to_end(&mut written).await.unwrap();
        assert_eq!(written, frame.to_vec());
    }

    #[tokio::test]
    async fn test_stop_joins_with_stalled_peer() {
        let (client, _server) = duplex(32);
        let (read_half, write_half) = tokio::io::split(client);

        let mut pumps = PumpGroup::new();
        let queue = pumps.spawn_writer(write_half, 1);
        let _inbound = pumps.spawn_reader(read_half, &small_config());

        // More than the pipe holds; the peer never reads any of it.
        queue
            .push(Frame::new(packet_type::DATA, Bytes::from(vec![0u8; 256])))
            .await
            .unwrap();
        queue.close();
        pumps.stop();

        let exits = tokio::time::timeout(std::time::Duration::from_secs(1), pumps.join_all())
            .await
            .expect("stalled writer should not block the join");
        assert_eq!(exits.len(), 2);
        assert!(exits.iter().all(|(_, outcome)| outcome.is_clean()));
    }
}

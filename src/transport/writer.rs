//! Writer pump and the outbound queue feeding it.
//!
//! ```text
//! Caller 1 ─┐
//! Caller 2 ─┼─► OutboundQueue (bounded mpsc) ─► Writer pump ─► stream
//! Caller N ─┘
//! ```
//!
//! The queue is bounded, so callers outrunning the wire wait in
//! [`OutboundQueue::push`]. Closing the queue is an explicit operation: once
//! closed, pushes fail immediately and the pump drains what is already
//! queued, reports [`PumpOutcome::Finished`] and shuts the write half down.
//!
//! The stop signal ends the pump without draining, even in the middle of a
//! write the peer is not reading. The receiver is dropped on the way out,
//! so callers waiting for queue space fail with [`SftpError::Shutdown`].

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use super::PumpOutcome;
use crate::error::{Result, SftpError};
use crate::protocol::{Frame, HEADER_SIZE};

/// Default outbound queue capacity, in frames.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the stream.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header.
    pub header: [u8; HEADER_SIZE],
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

impl From<Frame> for OutboundFrame {
    fn from(frame: Frame) -> Self {
        Self {
            header: frame.header.encode(),
            payload: frame.payload,
        }
    }
}

/// Bounded FIFO of frames waiting for the writer pump.
pub struct OutboundQueue {
    /// `None` once closed.
    tx: Mutex<Option<mpsc::Sender<OutboundFrame>>>,
    /// Frames accepted but not yet written.
    pending: Arc<AtomicUsize>,
}

impl OutboundQueue {
    fn new(tx: mpsc::Sender<OutboundFrame>, pending: Arc<AtomicUsize>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            pending,
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<OutboundFrame>> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Queue a frame, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// [`SftpError::Shutdown`] if the queue is closed or the writer pump
    /// has exited.
    pub async fn push(&self, frame: Frame) -> Result<()> {
        let tx = self
            .sender()
            .ok_or_else(|| SftpError::Shutdown("outbound queue closed".to_string()))?;

        self.pending.fetch_add(1, Ordering::AcqRel);
        tx.send(frame.into()).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            SftpError::Shutdown("writer stopped".to_string())
        })
    }

    /// Close the queue. Frames already queued are still written.
    ///
    /// Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Frames queued or in the middle of being written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Create the outbound queue and the future driving the writer pump.
pub(crate) fn writer_pump<W>(
    writer: W,
    capacity: usize,
    stop: oneshot::Receiver<()>,
) -> (OutboundQueue, impl std::future::Future<Output = PumpOutcome>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));
    let queue = OutboundQueue::new(tx, pending.clone());

    (queue, writer_loop(rx, writer, pending, stop))
}

/// Main writer loop - receives frames and writes them to the stream.
///
/// Uses batching and scatter/gather I/O (writev). A failed write is not
/// retried. A dropped stop sender counts as a stop request.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
    mut stop: oneshot::Receiver<()>,
) -> PumpOutcome
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = tokio::select! {
            biased;
            _ = &mut stop => return stopped(rx, &pending),
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        let written = tokio::select! {
            biased;
            _ = &mut stop => {
                pending.fetch_sub(batch_size, Ordering::Release);
                return stopped(rx, &pending);
            }
            written = write_batch(&mut writer, &batch) => written,
        };
        if let Err(e) = written {
            return PumpOutcome::Failed(e);
        }
        pending.fetch_sub(batch_size, Ordering::Release);
    }

    if let Err(e) = writer.shutdown().await {
        tracing::debug!("Closing write half failed: {}", e);
    }
    PumpOutcome::Finished
}

/// Abandon whatever is still queued. The write half is dropped unflushed.
fn stopped(mut rx: mpsc::Receiver<OutboundFrame>, pending: &AtomicUsize) -> PumpOutcome {
    rx.close();
    let mut dropped = 0;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    pending.fetch_sub(dropped, Ordering::Release);
    tracing::debug!("Writer pump stopped, {} queued frames dropped", dropped);
    PumpOutcome::Finished
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(SftpError::Transport(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data after the first `skip_bytes`.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        for part in [&frame.header[..], &frame.payload[..]] {
            let end = offset + part.len();
            if !part.is_empty() && skip_bytes < end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&part[start..]));
            }
            offset = end;
        }
    }

    slices
}

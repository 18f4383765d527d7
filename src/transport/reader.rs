//! Reader pump: stream bytes → frames → inbound queue.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};

use super::PumpOutcome;
use crate::protocol::{Frame, FrameBuffer};

/// Default read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default inbound queue capacity, in frames.
pub const DEFAULT_INBOUND_CAPACITY: usize = 64;

/// Read frames until EOF, a stream or framing error, or a stop request.
///
/// Exactly one outcome is produced:
/// - EOF → [`PumpOutcome::PeerClosed`]
/// - stop requested, or nobody left to consume frames → [`PumpOutcome::Finished`]
/// - I/O or framing error → [`PumpOutcome::Failed`]
pub(crate) async fn reader_loop<R>(
    mut reader: R,
    inbound: mpsc::Sender<Frame>,
    mut stop: oneshot::Receiver<()>,
    mut frames: FrameBuffer,
    read_buffer_size: usize,
) -> PumpOutcome
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; read_buffer_size.max(1)];

    loop {
        let n = tokio::select! {
            _ = &mut stop => return PumpOutcome::Finished,
            read = reader.read(&mut buf) => match read {
                Ok(0) => return PumpOutcome::PeerClosed,
                Ok(n) => n,
                Err(e) => return PumpOutcome::Failed(e.into()),
            },
        };

        let parsed = match frames.push(&buf[..n]) {
            Ok(parsed) => parsed,
            Err(e) => return PumpOutcome::Failed(e),
        };

        for frame in parsed {
            tracing::trace!("Read {} frame ({} bytes)", frame.type_name(), frame.size());
            tokio::select! {
                _ = &mut stop => return PumpOutcome::Finished,
                sent = inbound.send(frame) => {
                    if sent.is_err() {
                        return PumpOutcome::Finished;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SftpError;
    use crate::protocol::packet_type;
    use bytes::Bytes;
    use tokio::io::{duplex, AsyncWriteExt};

    fn spawn_reader(
        reader: tokio::io::DuplexStream,
    ) -> (
        mpsc::Receiver<Frame>,
        oneshot::Sender<()>,
        tokio::task::JoinHandle<PumpOutcome>,
    ) {
        let (tx, rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(reader_loop(reader, tx, stop_rx, FrameBuffer::new(), 16));
        (rx, stop_tx, task)
    }

    #[tokio::test]
    async fn test_frames_published_then_peer_closed() {
        let (client, mut server) = duplex(1024);
        let (mut rx, _stop, task) = spawn_reader(client);

        let first = Frame::new(packet_type::HANDLE, Bytes::from_static(b"a longer payload than the buffer"));
        let second = Frame::new(packet_type::STATUS, Bytes::from_static(b"x"));
        server.write_all(&first.to_vec()).await.unwrap();
        server.write_all(&second.to_vec()).await.unwrap();
        drop(server);

        assert_eq!(rx.recv().await.unwrap(), first);
        assert_eq!(rx.recv().await.unwrap(), second);
        assert!(matches!(task.await.unwrap(), PumpOutcome::PeerClosed));
    }

    #[tokio::test]
    async fn test_stop_request_finishes() {
        let (client, _server) = duplex(1024);
        let (_rx, stop, task) = spawn_reader(client);

        stop.send(()).unwrap();

        assert!(matches!(task.await.unwrap(), PumpOutcome::Finished));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_failure() {
        let (client, mut server) = duplex(1024);
        let (tx, _rx) = mpsc::channel(8);
        let (_stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(reader_loop(
            client,
            tx,
            stop_rx,
            FrameBuffer::with_max_packet(4),
            64,
        ));

        let frame = Frame::new(packet_type::DATA, Bytes::from_static(b"too large"));
        server.write_all(&frame.to_vec()).await.unwrap();

        match task.await.unwrap() {
            PumpOutcome::Failed(SftpError::Protocol(msg)) => assert!(msg.contains("exceeds")),
            other => panic!("expected protocol failure, got {:?}", other),
        }
    }
}

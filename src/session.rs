//! Session dispatcher - handshake, main routing loop and teardown.
//!
//! ```text
//! Connecting ─INIT─► Handshaking ─VERSION ok─► Ready ─fatal/close─► Closing ─► Closed
//!                         │                                           ▲
//!                         └──────────── mismatch / stream error ──────┘
//! ```
//!
//! The dispatcher is the only writer of the session [`Phase`] and the only
//! place that closes the outbound queue.

use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};

use crate::codec::{decode, encode, Message};
use crate::error::{Result, SftpError};
use crate::protocol::Frame;
use crate::router::Router;
use crate::transport::{OutboundQueue, Pump, PumpGroup, PumpOutcome, TransportConfig};

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Handshaking,
    Ready,
    Closing,
    Closed,
}

impl Phase {
    /// Whether requests may still be issued.
    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self, Phase::Ready)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Connecting => "connecting",
            Phase::Handshaking => "handshaking",
            Phase::Ready => "ready",
            Phase::Closing => "closing",
            Phase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What woke the main loop.
enum Event {
    Frame(Frame),
    InboundClosed,
    PumpExit(Pump, PumpOutcome),
    PumpsGone,
    LocalClose,
}

/// How the main loop ended.
enum SessionEnd {
    /// Local close or peer close. The error is only the abort reason.
    Clean(SftpError),
    Fatal(SftpError),
}

/// Owner of the pumps, the inbound queue and the phase.
pub(crate) struct Dispatcher {
    router: Arc<Router>,
    outbound: Arc<OutboundQueue>,
    inbound: mpsc::Receiver<Frame>,
    pumps: PumpGroup,
    phase: watch::Sender<Phase>,
}

impl Dispatcher {
    /// Spawn both pumps over the stream halves. The session starts in
    /// [`Phase::Connecting`].
    pub(crate) fn start<R, W>(reader: R, writer: W, config: &TransportConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut pumps = PumpGroup::new();
        let outbound = pumps.spawn_writer(writer, config.outbound_capacity);
        let inbound = pumps.spawn_reader(reader, config);
        let (phase, _) = watch::channel(Phase::Connecting);

        Self {
            router: Arc::new(Router::new()),
            outbound: Arc::new(outbound),
            inbound,
            pumps,
            phase,
        }
    }

    pub(crate) fn router(&self) -> Arc<Router> {
        self.router.clone()
    }

    pub(crate) fn outbound(&self) -> Arc<OutboundQueue> {
        self.outbound.clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: Phase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            tracing::debug!("Session phase {} -> {}", previous, phase);
        }
    }

    /// Send INIT and wait for the matching VERSION.
    ///
    /// The exchange bypasses the router: the first inbound frame is read
    /// straight off the queue. On error the caller must still run
    /// [`Dispatcher::teardown`].
    pub(crate) async fn handshake(&mut self, version: u32) -> Result<u32> {
        let init = encode(&Message::Init {
            version,
            extensions: Vec::new(),
        })?;
        if let Err(e) = self.outbound.push(init).await {
            // The writer is gone; its own outcome says why.
            tracing::debug!("INIT not queued: {}", e);
            return Err(handshake_interrupted(self.pumps.next_exit().await));
        }
        self.set_phase(Phase::Handshaking);

        let first = tokio::select! {
            biased;
            frame = self.inbound.recv() => frame,
            exit = self.pumps.next_exit() => return Err(handshake_interrupted(exit)),
        };
        let frame = match first {
            Some(frame) => frame,
            None => {
                let exit = self.pumps.next_exit().await;
                return Err(handshake_interrupted(exit));
            }
        };

        let reply = decode(&frame)
            .map_err(|e| SftpError::Handshake(format!("undecodable first message: {}", e)))?;

        match reply {
            Message::Version { version: offered, .. } if offered == version => {
                self.set_phase(Phase::Ready);
                tracing::info!("Handshake complete, SFTP version {}", offered);
                Ok(offered)
            }
            Message::Version { version: offered, .. } => Err(SftpError::Handshake(format!(
                "server offered version {}, requested {}",
                offered, version
            ))),
            other => Err(SftpError::Handshake(format!(
                "expected VERSION, got {}",
                other.kind()
            ))),
        }
    }

    /// Route inbound frames until a pump exits, a fatal error occurs or the
    /// client asks to close, then tear the session down.
    ///
    /// Returns the session's fatal error, if there was one.
    pub(crate) async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        let mut inbound_open = true;

        let end = loop {
            let event = tokio::select! {
                biased;
                _ = &mut shutdown => Event::LocalClose,
                frame = self.inbound.recv(), if inbound_open => match frame {
                    Some(frame) => Event::Frame(frame),
                    None => Event::InboundClosed,
                },
                exit = self.pumps.next_exit() => match exit {
                    Some((pump, outcome)) => Event::PumpExit(pump, outcome),
                    None => Event::PumpsGone,
                },
            };

            match event {
                Event::Frame(frame) => {
                    if let Err(e) = self.dispatch(frame) {
                        break SessionEnd::Fatal(e);
                    }
                }
                Event::InboundClosed => inbound_open = false,
                Event::PumpExit(pump, outcome) => {
                    // Responses the reader published before exiting still count.
                    if let Err(e) = self.drain_inbound() {
                        break SessionEnd::Fatal(e);
                    }
                    break match outcome {
                        PumpOutcome::Failed(e) => SessionEnd::Fatal(e),
                        other => SessionEnd::Clean(other.into_error(pump)),
                    };
                }
                Event::PumpsGone => {
                    break SessionEnd::Clean(SftpError::Shutdown("transport stopped".to_string()))
                }
                Event::LocalClose => {
                    break SessionEnd::Clean(SftpError::Shutdown("session closed".to_string()))
                }
            }
        };

        match end {
            SessionEnd::Clean(reason) => {
                tracing::info!("Session ending: {}", reason);
                self.teardown(&reason).await;
                Ok(())
            }
            SessionEnd::Fatal(err) => {
                tracing::error!("Session failed: {}", err);
                self.teardown(&err).await;
                Err(err)
            }
        }
    }

    /// Decode one frame and hand it to the router.
    ///
    /// Decode failures are fatal. Stray responses are logged and dropped.
    fn dispatch(&self, frame: Frame) -> Result<()> {
        let message = decode(&frame)?;
        tracing::debug!("Routing {} for {:?}", message.kind(), message.request_id());

        match self.router.resolve(message) {
            Ok(()) => Ok(()),
            Err(e @ SftpError::Routing { .. }) => {
                tracing::warn!("Discarding response: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn drain_inbound(&mut self) -> Result<()> {
        while let Ok(frame) = self.inbound.try_recv() {
            self.dispatch(frame)?;
        }
        Ok(())
    }

    /// Close the outbound queue, fail every pending request with `reason`,
    /// stop both pumps and join them.
    ///
    /// The writer is stopped rather than drained: every request it could
    /// still send has already been aborted, and a peer that stopped reading
    /// would otherwise hold the join forever.
    pub(crate) async fn teardown(&mut self, reason: &SftpError) {
        self.set_phase(Phase::Closing);

        self.outbound.close();
        let aborted = self.router.abort(reason);
        if aborted > 0 {
            tracing::debug!("Aborted {} pending request(s)", aborted);
        }

        self.pumps.stop();
        for (pump, outcome) in self.pumps.join_all().await {
            if !outcome.is_clean() {
                tracing::debug!("{:?} pump stopped after teardown began: {:?}", pump, outcome);
            }
        }
        self.inbound.close();

        self.set_phase(Phase::Closed);
    }
}

fn handshake_interrupted(exit: Option<(Pump, PumpOutcome)>) -> SftpError {
    match exit {
        Some((_, PumpOutcome::Failed(e))) => e,
        Some((pump, _)) => SftpError::Handshake(format!(
            "connection closed before VERSION ({:?} pump stopped)",
            pump
        )),
        None => SftpError::Handshake("transport stopped before VERSION".to_string()),
    }
}

//! The task behind a [`TransportSession`](crate::TransportSession).
//!
//! One supervisor runs per started session. It loops over connection
//! attempts, serves each established link until it ends, and sleeps per the
//! reconnect policy in between. Only the session's current epoch may write
//! connection state.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connector::{ConnectRequest, Connector, Link};
use crate::error::{Result, TransportError};
use crate::frame::{ClientFrame, LinkEvent, ServerFrame};
use crate::heartbeat::Liveness;
use crate::session::{Command, ConnectionState, Handshake, InboundFrame, SessionConfig, SessionHandlers, Shared};


/// Why a served link ended.
enum LinkEnd {
    /// The session was cancelled or dropped.
    Shutdown,
    /// The link failed and should be replaced.
    Lost(TransportError),
}

pub(crate) struct Supervisor {
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) config: SessionConfig,
    pub(crate) shared: Arc<Shared>,
    pub(crate) request: ConnectRequest,
    pub(crate) handlers: SessionHandlers,
    /// Epoch the session was started in.
    pub(crate) epoch: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) commands: mpsc::Receiver<Command>,
    pub(crate) handshake: watch::Sender<Handshake>,
}

impl Supervisor {
    pub(crate) async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            let attempt = {
                let open = tokio::time::timeout(self.config.connect_timeout, self.connector.open(&self.request));
                tokio::pin!(open);
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => {
                        // A link produced after cancellation is closed, never served.
                        if let Ok(Ok(link)) = open.await {
                            close_stray(&link);
                        }
                        break;
                    }
                    result = &mut open => result.unwrap_or_else(|_| Err(TransportError::ConnectTimeout {
                        timeout_ms: millis(self.config.connect_timeout),
                    })),
                }
            };

            match attempt {
                Ok(link) => {
                    if self.cancel.is_cancelled() {
                        close_stray(&link);
                        break;
                    }
                    failures = 0;
                    match self.serve(link).await {
                        LinkEnd::Shutdown => break,
                        LinkEnd::Lost(err) => {
                            warn!(error = %err, "connection lost");
                            self.handlers.emit_error(&err);
                            let _ = self.shared.set_state(self.epoch, ConnectionState::Reconnecting);
                        }
                    }
                }
                Err(err) => {
                    failures += 1;
                    warn!(error = %err, failures, "connection attempt failed");
                    self.handlers.emit_error(&err);
                    let exhausted = !self.config.reconnect.allows_attempt(failures);
                    let next = if exhausted {
                        ConnectionState::Disconnected
                    } else {
                        ConnectionState::Reconnecting
                    };
                    let _ = self.shared.set_state(self.epoch, next);
                    let _ = self.handshake.send_replace(Some(Err(err)));
                    if exhausted {
                        let err = TransportError::GaveUp { attempts: failures };
                        error!(error = %err, "reconnect attempts exhausted");
                        self.handlers.emit_error(&err);
                        break;
                    }
                }
            }

            let delay = self.config.reconnect.delay_for(failures, rand::random());
            debug!(delay_ms = millis(delay), "reconnect scheduled");
            if !self.wait(delay).await {
                break;
            }
        }
        debug!("session task finished");
    }

    /// Sleep until the next attempt, dropping commands that need a link.
    /// Returns `false` when the session shut down meanwhile.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return false,
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Publish { topic, .. }) => {
                        warn!(topic, "publish dropped while reconnecting");
                    }
                    Some(Command::Subscribe { .. } | Command::Unsubscribe { .. }) => {}
                    None => return false,
                },
            }
        }
    }

    async fn serve(&mut self, link: Link) -> LinkEnd {
        let Link {
            outbound,
            mut inbound,
            heartbeat,
        } = link;

        let mut live: HashSet<String> = HashSet::new();
        for (id, topic) in self.shared.snapshot() {
            let frame = ClientFrame::Subscribe {
                id: id.clone(),
                destination: topic,
            };
            if outbound.send(frame).await.is_err() {
                return LinkEnd::Lost(TransportError::Dropped {
                    reason: "link closed while subscribing".into(),
                });
            }
            let _ = live.insert(id);
        }

        if !self.shared.set_state(self.epoch, ConnectionState::Connected) {
            error!("connection completed after disconnect; closing it");
            let _ = outbound.try_send(ClientFrame::Disconnect);
            return LinkEnd::Shutdown;
        }
        info!(subscriptions = live.len(), "session connected");
        self.handlers.emit_connected();
        let _ = self.handshake.send_replace(Some(Ok(())));

        let mut liveness = Liveness::new();
        let mut beat = heartbeat.send_every.map(every);
        let mut check = heartbeat.expect_every.map(every);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    let _ = outbound.try_send(ClientFrame::Disconnect);
                    return LinkEnd::Shutdown;
                }
                event = inbound.recv() => match event {
                    Some(LinkEvent::Frame(frame)) => {
                        liveness.mark();
                        if let Some(err) = self.on_frame(frame) {
                            return LinkEnd::Lost(err);
                        }
                    }
                    Some(LinkEvent::Closed { reason }) => {
                        return LinkEnd::Lost(TransportError::Dropped { reason });
                    }
                    None => {
                        return LinkEnd::Lost(TransportError::Dropped {
                            reason: "link closed".into(),
                        });
                    }
                },
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Err(err) = apply(command, &outbound, &mut live) {
                            return LinkEnd::Lost(err);
                        }
                    }
                    None => {
                        let _ = outbound.try_send(ClientFrame::Disconnect);
                        return LinkEnd::Shutdown;
                    }
                },
                () = tick(&mut beat) => {
                    if let Err(mpsc::error::TrySendError::Closed(_)) = outbound.try_send(ClientFrame::Heartbeat) {
                        return LinkEnd::Lost(TransportError::Dropped {
                            reason: "link closed".into(),
                        });
                    }
                }
                () = tick(&mut check) => {
                    if let Some(expect) = heartbeat.expect_every {
                        if liveness.is_stale(expect) {
                            return LinkEnd::Lost(TransportError::HeartbeatTimeout {
                                silent_ms: millis(liveness.silence()),
                            });
                        }
                    }
                }
            }
        }
    }

    fn on_frame(&self, frame: ServerFrame) -> Option<TransportError> {
        match frame {
            ServerFrame::Message {
                subscription,
                destination,
                body,
            } => {
                self.shared.deliver(&subscription, &InboundFrame { destination, body });
                None
            }
            ServerFrame::Error { message, body } => {
                warn!(message, body, "broker sent ERROR");
                Some(TransportError::Rejected { reason: message })
            }
            ServerFrame::Receipt { id } => {
                debug!(id, "receipt");
                None
            }
            ServerFrame::Heartbeat => None,
        }
    }
}

fn apply(command: Command, outbound: &mpsc::Sender<ClientFrame>, live: &mut HashSet<String>) -> Result<()> {
    let frame = match command {
        Command::Subscribe { id, topic } => {
            if !live.insert(id.clone()) {
                return Ok(());
            }
            ClientFrame::Subscribe {
                id,
                destination: topic,
            }
        }
        Command::Unsubscribe { id } => {
            if !live.remove(&id) {
                return Ok(());
            }
            ClientFrame::Unsubscribe { id }
        }
        Command::Publish { topic, body } => ClientFrame::Send {
            destination: topic,
            body,
        },
    };

    match outbound.try_send(frame) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(frame)) => {
            warn!(?frame, "link backlog full; frame dropped");
            Ok(())
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Dropped {
            reason: "link closed".into(),
        }),
    }
}

fn close_stray(link: &Link) {
    error!("connection completed after disconnect; closing it");
    let _ = link.outbound.try_send(ClientFrame::Disconnect);
}

fn every(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

//! The transport session: one supervised broker connection per user.
//!
//! [`TransportSession`] owns a background task that connects through a
//! [`Connector`], replays subscriptions, keeps heartbeats flowing, and
//! reconnects according to the [`ReconnectConfig`] whenever the link drops.
//! Callers interact through cheap synchronous methods; the task is driven
//! over a command channel and publishes its [`ConnectionState`] on a
//! `watch` channel.
//!
//! Subscriptions live in a table owned by the session rather than the link,
//! so they survive reconnects and can be registered before the first
//! connect completes.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use parley_core::{ReconnectConfig, UserId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use crate::connector::{ConnectRequest, Connector, Credentials};
use crate::error::{Result, TransportError};
use crate::heartbeat::HeartbeatConfig;
use crate::supervisor::Supervisor;

/// Default handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the session command queue.
pub const DEFAULT_COMMAND_BUFFER: usize = 256;

/// Tunables for a [`TransportSession`].
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Heartbeat intervals proposed to the broker.
    pub heartbeat: HeartbeatConfig,
    /// Delay policy between connection attempts.
    pub reconnect: ReconnectConfig,
    /// Upper bound on a single connection attempt.
    pub connect_timeout: Duration,
    /// Capacity of the command queue between callers and the session task.
    pub command_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

/// Lifecycle of the broker connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session, or the session was shut down.
    Disconnected,
    /// First connection attempt in flight.
    Connecting,
    /// Handshake completed; frames flow.
    Connected,
    /// The link dropped or an attempt failed; waiting to retry.
    Reconnecting,
}

/// A message delivered on a subscribed topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundFrame {
    /// Destination the broker delivered it on.
    pub destination: String,
    /// Raw payload.
    pub body: String,
}

/// Callback invoked for every frame on a subscription.
pub type FrameCallback = Arc<dyn Fn(&InboundFrame) + Send + Sync>;

type ConnectedCallback = Arc<dyn Fn() + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&TransportError) + Send + Sync>;

/// Lifecycle callbacks supplied to [`TransportSession::connect`].
#[derive(Clone, Default)]
pub struct SessionHandlers {
    on_connected: Option<ConnectedCallback>,
    on_error: Option<ErrorCallback>,
}

impl SessionHandlers {
    /// No callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after every successful (re)connect.
    #[must_use]
    pub fn on_connected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connected = Some(Arc::new(f));
        self
    }

    /// Called for every connection error, recoverable or not.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&TransportError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub(crate) fn emit_connected(&self) {
        if let Some(f) = &self.on_connected {
            if panic::catch_unwind(AssertUnwindSafe(|| f())).is_err() {
                error!("on_connected callback panicked");
            }
        }
    }

    pub(crate) fn emit_error(&self, err: &TransportError) {
        if let Some(f) = &self.on_error {
            if panic::catch_unwind(AssertUnwindSafe(|| f(err))).is_err() {
                error!(error = %err, "on_error callback panicked");
            }
        }
    }
}

impl fmt::Debug for SessionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandlers")
            .field("on_connected", &self.on_connected.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Identifies one subscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: String,
    topic: String,
}

impl SubscriptionHandle {
    /// Broker-level subscription id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

struct SubEntry {
    id: String,
    callback: FrameCallback,
}

pub(crate) enum Command {
    Subscribe { id: String, topic: String },
    Unsubscribe { id: String },
    Publish { topic: String, body: String },
}

/// State shared between the session handle and its task.
pub(crate) struct Shared {
    /// topic -> subscription
    subs: Mutex<HashMap<String, SubEntry>>,
    state: watch::Sender<ConnectionState>,
    /// Bumped by every disconnect; a task only writes state for its own epoch.
    epoch: Mutex<u64>,
    next_sub: AtomicU64,
}

impl Shared {
    pub(crate) fn set_state(&self, epoch: u64, state: ConnectionState) -> bool {
        let current = self.epoch.lock();
        if *current != epoch {
            return false;
        }
        let _ = self.state.send_replace(state);
        true
    }

    pub(crate) fn snapshot(&self) -> Vec<(String, String)> {
        self.subs
            .lock()
            .iter()
            .map(|(topic, entry)| (entry.id.clone(), topic.clone()))
            .collect()
    }

    pub(crate) fn deliver(&self, subscription: &str, frame: &InboundFrame) {
        let callback = self
            .subs
            .lock()
            .values()
            .find(|entry| entry.id == subscription)
            .map(|entry| Arc::clone(&entry.callback));

        match callback {
            Some(callback) => {
                if panic::catch_unwind(AssertUnwindSafe(|| callback(frame))).is_err() {
                    error!(destination = %frame.destination, "subscription callback panicked");
                }
            }
            None => debug!(subscription, "dropping frame for unknown subscription"),
        }
    }
}

/// Outcome of the most recent connection attempt; `None` until the first one
/// finishes.
pub(crate) type Handshake = Option<Result<()>>;

struct Active {
    user_id: UserId,
    handshake: watch::Receiver<Handshake>,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// A broker connection for one user at a time.
pub struct TransportSession {
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    shared: Arc<Shared>,
    active: Mutex<Option<Active>>,
}

impl TransportSession {
    /// Create a disconnected session.
    pub fn new(connector: Arc<dyn Connector>, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            config,
            shared: Arc::new(Shared {
                subs: Mutex::new(HashMap::new()),
                state,
                epoch: Mutex::new(0),
                next_sub: AtomicU64::new(0),
            }),
            active: Mutex::new(None),
        }
    }

    /// Start a session for `user_id` and wait for the first handshake.
    ///
    /// A failed first attempt is returned here and also reported through
    /// `on_error`; the session keeps retrying in the background until
    /// [`disconnect`](Self::disconnect). Connecting again for the same user
    /// starts nothing new: it waits for a pending handshake, then returns the
    /// outcome of the latest attempt. Connecting a different user without
    /// disconnecting first fails with [`TransportError::SessionBusy`].
    #[instrument(skip_all, fields(user = %user_id))]
    pub async fn connect(
        &self,
        user_id: UserId,
        credentials: Credentials,
        handlers: SessionHandlers,
    ) -> Result<()> {
        let mut handshake = self.start(user_id, credentials, handlers)?;
        let outcome = match handshake.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => Option::clone(&outcome),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(TransportError::Closed))
    }

    fn start(
        &self,
        user_id: UserId,
        credentials: Credentials,
        handlers: SessionHandlers,
    ) -> Result<watch::Receiver<Handshake>> {
        let mut active = self.active.lock();
        if let Some(current) = active.as_ref() {
            if current.task.is_finished() {
                debug!(previous = %current.user_id, "replacing finished session");
            } else if current.user_id == user_id {
                debug!("session already started for this user");
                return Ok(current.handshake.clone());
            } else {
                let err = TransportError::SessionBusy {
                    active: current.user_id.to_string(),
                    requested: user_id.to_string(),
                };
                warn!(error = %err, "connect refused");
                handlers.emit_error(&err);
                return Err(err);
            }
        }

        let epoch = *self.shared.epoch.lock();
        let _ = self.shared.set_state(epoch, ConnectionState::Connecting);

        let (cmd_tx, cmd_rx) = mpsc::channel(self.config.command_buffer.max(1));
        let (handshake_tx, handshake_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            connector: Arc::clone(&self.connector),
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            request: ConnectRequest {
                user_id: user_id.clone(),
                credentials,
                heartbeat: self.config.heartbeat,
            },
            handlers,
            epoch,
            cancel: cancel.clone(),
            commands: cmd_rx,
            handshake: handshake_tx,
        };
        let span = info_span!("session", user = %user_id);
        let task = tokio::spawn(supervisor.run().instrument(span));

        *active = Some(Active {
            user_id,
            handshake: handshake_rx.clone(),
            commands: cmd_tx,
            cancel,
            task,
        });
        Ok(handshake_rx)
    }

    /// Tear the session down: stop the task, cancel pending reconnects and
    /// forget every subscription. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let taken = self.active.lock().take();
        {
            let mut epoch = self.shared.epoch.lock();
            *epoch += 1;
            let _ = self.shared.state.send_replace(ConnectionState::Disconnected);
        }
        self.shared.subs.lock().clear();

        match taken {
            Some(active) => {
                active.cancel.cancel();
                info!(user = %active.user_id, "session disconnected");
            }
            None => debug!("disconnect without an active session"),
        }
    }

    /// Publish `payload` to `topic`. Returns `false` and logs a warning when
    /// the session is not connected or the queue is full.
    pub fn publish(&self, topic: &str, payload: &str) -> bool {
        if self.state() != ConnectionState::Connected {
            warn!(topic, state = ?self.state(), "publish while not connected; dropped");
            return false;
        }
        let active = self.active.lock();
        let Some(active) = active.as_ref() else {
            return false;
        };
        match active.commands.try_send(Command::Publish {
            topic: topic.to_string(),
            body: payload.to_string(),
        }) {
            Ok(()) => true,
            Err(e) => {
                warn!(topic, error = %e, "publish dropped");
                false
            }
        }
    }

    /// Subscribe to `topic`. Established immediately when connected,
    /// otherwise on the next successful connect. Subscribing to a topic that
    /// already has a subscription returns the existing handle.
    pub fn subscribe(&self, topic: impl Into<String>, on_frame: FrameCallback) -> SubscriptionHandle {
        let topic = topic.into();
        let id = {
            let mut subs = self.shared.subs.lock();
            if let Some(entry) = subs.get(&topic) {
                debug!(topic, id = %entry.id, "already subscribed");
                return SubscriptionHandle {
                    id: entry.id.clone(),
                    topic,
                };
            }
            let id = format!("sub-{}", self.shared.next_sub.fetch_add(1, Ordering::Relaxed));
            let _ = subs.insert(
                topic.clone(),
                SubEntry {
                    id: id.clone(),
                    callback: on_frame,
                },
            );
            id
        };
        debug!(topic, id, "subscription added");

        self.command(Command::Subscribe {
            id: id.clone(),
            topic: topic.clone(),
        });
        SubscriptionHandle { id, topic }
    }

    /// Remove a subscription. Unknown or stale handles are ignored.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let removed = {
            let mut subs = self.shared.subs.lock();
            match subs.get(&handle.topic) {
                Some(entry) if entry.id == handle.id => subs.remove(&handle.topic).is_some(),
                _ => false,
            }
        };
        if removed {
            debug!(topic = %handle.topic, id = %handle.id, "subscription removed");
            self.command(Command::Unsubscribe {
                id: handle.id.clone(),
            });
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Follow state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Whether frames currently flow.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The user the session belongs to, if one is active.
    pub fn user(&self) -> Option<UserId> {
        self.active.lock().as_ref().map(|a| a.user_id.clone())
    }

    /// Topics with a live or pending subscription, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.shared.subs.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    fn command(&self, command: Command) {
        if let Some(active) = self.active.lock().as_ref() {
            if let Err(e) = active.commands.try_send(command) {
                warn!(error = %e, "session command queue rejected a command");
            }
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.cancel.cancel();
        }
    }
}

impl fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSession")
            .field("state", &self.state())
            .field("user", &self.user())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! The messaging façade chat views talk to.
//!
//! [`MessageGateway`] ties one [`TransportSession`] to a [`TopicRouter`],
//! a [`HandlerRegistry`] and a [`DeliveryTracker`]. Views register a callback
//! under their own consumer id; every relevant message reaches each
//! registration at most once, whichever topic it arrived on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use parley_core::{ConsumerId, Message, MessageDraft, TopicNames, UserId};
use parley_transport::{ConnectionState, Credentials, SessionHandlers, TransportError, TransportSession};
use tracing::{debug, info, instrument, warn};

use crate::dedup::{DEFAULT_DEDUP_CAPACITY, DeliveryTracker};
use crate::error::SendError;
use crate::registry::HandlerRegistry;
use crate::router::TopicRouter;

/// Gateway tunables.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Broker destination names.
    pub topics: TopicNames,
    /// Message ids remembered per registration for dedup.
    pub dedup_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            topics: TopicNames::default(),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

/// Connection status as chat views see it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayState {
    /// Never connected, or disconnected on purpose.
    Idle,
    /// First connection attempt in flight.
    Connecting,
    /// Messages flow.
    Online,
    /// The link dropped; a reconnect is pending.
    Reconnecting,
    /// The broker could not be reached; sends are refused.
    Offline,
}

/// One user's messaging endpoint.
pub struct MessageGateway {
    session: Arc<TransportSession>,
    router: Arc<TopicRouter>,
    registry: Arc<HandlerRegistry>,
    tracker: Arc<DeliveryTracker>,
    user: Mutex<Option<UserId>>,
    /// Set when a connection attempt failed, cleared on the next connect.
    unreachable: Arc<AtomicBool>,
}

impl MessageGateway {
    /// Build a gateway on top of `session`.
    pub fn new(session: Arc<TransportSession>, config: GatewayConfig) -> Self {
        let registry = Arc::new(HandlerRegistry::new());
        let tracker = Arc::new(DeliveryTracker::new(config.dedup_capacity));
        let router = Arc::new(TopicRouter::new(
            config.topics,
            Arc::clone(&registry),
            Arc::clone(&tracker),
        ));
        Self {
            session,
            router,
            registry,
            tracker,
            user: Mutex::new(None),
            unreachable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connect as `user` and subscribe its topics.
    ///
    /// When the first attempt fails the error is returned, the gateway stays
    /// in [`GatewayState::Offline`] and keeps retrying in the background.
    #[instrument(skip_all, fields(user = %user))]
    pub async fn connect(&self, user: UserId, credentials: Credentials) -> Result<(), TransportError> {
        let reachable = Arc::clone(&self.unreachable);
        let unreachable = Arc::clone(&self.unreachable);
        let handlers = SessionHandlers::new()
            .on_connected(move || reachable.store(false, Ordering::SeqCst))
            .on_error(move |err| {
                if matches!(
                    err,
                    TransportError::Handshake { .. }
                        | TransportError::ConnectTimeout { .. }
                        | TransportError::Rejected { .. }
                        | TransportError::GaveUp { .. }
                ) {
                    unreachable.store(true, Ordering::SeqCst);
                }
            });

        let result = self.session.connect(user.clone(), credentials, handlers).await;
        if matches!(result, Err(TransportError::SessionBusy { .. })) {
            return result;
        }

        *self.user.lock() = Some(user.clone());
        let _ = self.router.attach(&self.session, &user);

        match &result {
            Ok(()) => info!("gateway online"),
            Err(err) => warn!(error = %err, "gateway offline; retrying in background"),
        }
        result
    }

    /// Disconnect, drop every registration and forget delivery history.
    /// Safe to call repeatedly.
    pub fn disconnect(&self) {
        self.session.disconnect();
        self.tracker.reset();
        self.registry.clear();
        self.unreachable.store(false, Ordering::SeqCst);
        if let Some(user) = self.user.lock().take() {
            info!(user = %user, "gateway disconnected");
        }
    }

    /// Compose and publish a message. Fire-and-forget: success means the
    /// frame was handed to the session, not that the peer received it.
    pub fn send(&self, draft: MessageDraft) -> Result<Message, SendError> {
        let message = Message::compose(draft)?;
        if !self.session.is_connected() {
            warn!(message_id = %message.id, "send while offline");
            return Err(SendError::Offline);
        }

        let payload = message.to_json()?;
        let topics = self.router.topics();
        let persisted = self.session.publish(&topics.app_destination, &payload);
        let echoed = self.session.publish(&topics.global, &payload);
        if !persisted && !echoed {
            return Err(SendError::Offline);
        }
        debug!(message_id = %message.id, to = %message.to, persisted, echoed, "message sent");
        Ok(message)
    }

    /// Register `callback` for messages involving `user` under `consumer`.
    /// A second registration with the same ids replaces the first.
    pub fn register_handler(
        &self,
        user: UserId,
        consumer: ConsumerId,
        callback: impl Fn(&Message) + Send + Sync + 'static,
    ) -> bool {
        self.registry.register(user, consumer, Arc::new(callback))
    }

    /// Remove a registration; unknown ids are ignored.
    pub fn unregister_handler(&self, user: &UserId, consumer: &ConsumerId) -> bool {
        self.tracker.forget(user, consumer);
        self.registry.unregister(user, consumer)
    }

    /// Current status.
    pub fn state(&self) -> GatewayState {
        match self.session.state() {
            ConnectionState::Connected => GatewayState::Online,
            ConnectionState::Connecting => GatewayState::Connecting,
            ConnectionState::Reconnecting if self.unreachable.load(Ordering::SeqCst) => GatewayState::Offline,
            ConnectionState::Reconnecting => GatewayState::Reconnecting,
            ConnectionState::Disconnected if self.user.lock().is_some() => GatewayState::Offline,
            ConnectionState::Disconnected => GatewayState::Idle,
        }
    }

    /// Whether sends currently go out.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// The connected user, if any.
    pub fn user(&self) -> Option<UserId> {
        self.user.lock().clone()
    }

    /// Broker destination names.
    pub fn topics(&self) -> &TopicNames {
        self.router.topics()
    }

    /// The underlying session.
    pub fn session(&self) -> &Arc<TransportSession> {
        &self.session
    }
}

impl std::fmt::Debug for MessageGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageGateway")
            .field("state", &self.state())
            .field("user", &self.user())
            .field("registrations", &self.registry.len())
            .finish_non_exhaustive()
    }
}

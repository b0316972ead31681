//! Maps logical chat topics onto transport subscriptions and turns inbound
//! frames into deliveries.

use std::sync::Arc;

use parley_core::{Message, TopicKind, TopicNames, UserId};
use parley_transport::{FrameCallback, InboundFrame, SubscriptionHandle, TransportSession};
use tracing::{debug, warn};

use crate::dedup::DeliveryTracker;
use crate::registry::{DispatchReport, HandlerRegistry};

/// What happened to one inbound frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Parsed and handed to the registry.
    Dispatched(DispatchReport),
    /// Parsed but not meant for this user.
    Filtered,
    /// Not a valid message; dropped.
    Malformed,
}

/// Routes frames from the personal and global topics to the registry.
pub struct TopicRouter {
    topics: TopicNames,
    registry: Arc<HandlerRegistry>,
    tracker: Arc<DeliveryTracker>,
}

impl TopicRouter {
    /// Create a router delivering into `registry`, deduplicated by `tracker`.
    pub fn new(topics: TopicNames, registry: Arc<HandlerRegistry>, tracker: Arc<DeliveryTracker>) -> Self {
        Self {
            topics,
            registry,
            tracker,
        }
    }

    /// Topic names in use.
    pub fn topics(&self) -> &TopicNames {
        &self.topics
    }

    /// Subscribe `user`'s personal topic and the global feed on `session`.
    /// Safe to call repeatedly; existing subscriptions are reused.
    pub fn attach(self: &Arc<Self>, session: &TransportSession, user: &UserId) -> [SubscriptionHandle; 2] {
        let personal = session.subscribe(self.topics.personal(user), self.callback(user));
        let global = session.subscribe(self.topics.global.clone(), self.callback(user));
        debug!(user = %user, personal = personal.topic(), global = global.topic(), "router attached");
        [personal, global]
    }

    fn callback(self: &Arc<Self>, user: &UserId) -> FrameCallback {
        let router = Arc::clone(self);
        let user = user.clone();
        Arc::new(move |frame: &InboundFrame| {
            let _ = router.route(&user, frame);
        })
    }

    /// Parse, filter and dispatch one frame received for `user`.
    pub fn route(&self, user: &UserId, frame: &InboundFrame) -> RouteOutcome {
        if let Some(TopicKind::Personal(owner)) = self.topics.classify(&frame.destination) {
            if owner != *user {
                debug!(user = %user, destination = %frame.destination, "personal frame for another user");
                return RouteOutcome::Filtered;
            }
        }

        let message = match Message::from_json(&frame.body) {
            Ok(message) => message,
            Err(e) => {
                warn!(destination = %frame.destination, error = %e, "dropping unparseable message");
                return RouteOutcome::Malformed;
            }
        };
        if let Err(e) = message.validate() {
            warn!(destination = %frame.destination, error = %e, "dropping invalid message");
            return RouteOutcome::Malformed;
        }

        if !message.involves(user) {
            debug!(user = %user, message_id = %message.id, "message not addressed to user");
            return RouteOutcome::Filtered;
        }

        let report = self.registry.dispatch_with(user, &message, |consumer| {
            self.tracker.first_delivery(user, consumer, &message.id)
        });
        debug!(
            user = %user,
            message_id = %message.id,
            delivered = report.delivered,
            duplicates = report.skipped,
            "message routed"
        );
        RouteOutcome::Dispatched(report)
    }
}

//! Per-user, per-consumer message callbacks.

use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use parley_core::{ConsumerId, Message, UserId};
use tracing::{debug, error};

/// Callback receiving delivered messages.
pub type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Outcome of one dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Callbacks that ran to completion.
    pub delivered: usize,
    /// Registrations the admit filter turned away.
    pub skipped: usize,
    /// Callbacks that panicked.
    pub panicked: usize,
}

/// Callback table keyed by owner user and consumer id.
///
/// Registering the same (user, consumer) twice replaces the earlier
/// callback. Dispatch runs over a snapshot, so callbacks may register or
/// unregister while being dispatched to.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<UserId, BTreeMap<ConsumerId, MessageCallback>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace a registration. Returns `true` when it replaced one.
    pub fn register(&self, user: UserId, consumer: ConsumerId, callback: MessageCallback) -> bool {
        debug!(user = %user, consumer = %consumer, "handler registered");
        self.handlers
            .write()
            .entry(user)
            .or_default()
            .insert(consumer, callback)
            .is_some()
    }

    /// Remove a registration. Returns `false` when there was none.
    pub fn unregister(&self, user: &UserId, consumer: &ConsumerId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(consumers) = handlers.get_mut(user) else {
            return false;
        };
        let removed = consumers.remove(consumer).is_some();
        if consumers.is_empty() {
            let _ = handlers.remove(user);
        }
        if removed {
            debug!(user = %user, consumer = %consumer, "handler unregistered");
        }
        removed
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    /// Consumers registered for `user`, in id order.
    pub fn consumers(&self, user: &UserId) -> Vec<ConsumerId> {
        self.handlers
            .read()
            .get(user)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of registrations.
    pub fn len(&self) -> usize {
        self.handlers.read().values().map(BTreeMap::len).sum()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `message` to every registration of `user`.
    pub fn dispatch(&self, user: &UserId, message: &Message) -> DispatchReport {
        self.dispatch_with(user, message, |_| true)
    }

    /// Deliver `message` to every registration of `user` that `admit`
    /// accepts. A panicking callback is logged and does not stop the rest.
    pub fn dispatch_with(
        &self,
        user: &UserId,
        message: &Message,
        mut admit: impl FnMut(&ConsumerId) -> bool,
    ) -> DispatchReport {
        let snapshot: Vec<(ConsumerId, MessageCallback)> = self
            .handlers
            .read()
            .get(user)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect())
            .unwrap_or_default();

        let mut report = DispatchReport::default();
        for (consumer, callback) in snapshot {
            if !admit(&consumer) {
                report.skipped += 1;
                continue;
            }
            if panic::catch_unwind(AssertUnwindSafe(|| callback(message))).is_ok() {
                report.delivered += 1;
            } else {
                report.panicked += 1;
                error!(user = %user, consumer = %consumer, message_id = %message.id, "message handler panicked");
            }
        }
        report
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

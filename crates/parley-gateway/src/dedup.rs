//! At-most-once delivery per registration.
//!
//! The same message can arrive more than once: on the global feed and on the
//! personal topic, or again after a reconnect. [`DeliveryTracker`] remembers
//! the most recent ids delivered to each (user, consumer) pair in a bounded
//! FIFO window.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;
use parley_core::{ConsumerId, MessageId, UserId};

/// Default number of ids remembered per registration.
pub const DEFAULT_DEDUP_CAPACITY: usize = 1024;

#[derive(Default)]
struct Window {
    ids: HashSet<MessageId>,
    order: VecDeque<MessageId>,
}

impl Window {
    fn admit(&mut self, id: &MessageId, capacity: usize) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= capacity {
            if let Some(oldest) = self.order.pop_front() {
                let _ = self.ids.remove(&oldest);
            }
        }
        let _ = self.ids.insert(id.clone());
        self.order.push_back(id.clone());
        true
    }
}

/// Tracks which message ids each registration has already received.
pub struct DeliveryTracker {
    capacity: usize,
    windows: Mutex<HashMap<(UserId, ConsumerId), Window>>,
}

impl DeliveryTracker {
    /// Remember up to `capacity` ids per registration (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record a delivery. Returns `true` the first time `id` is seen for this
    /// registration within the window.
    pub fn first_delivery(&self, user: &UserId, consumer: &ConsumerId, id: &MessageId) -> bool {
        self.windows
            .lock()
            .entry((user.clone(), consumer.clone()))
            .or_default()
            .admit(id, self.capacity)
    }

    /// Forget one registration's history.
    pub fn forget(&self, user: &UserId, consumer: &ConsumerId) {
        let _ = self.windows.lock().remove(&(user.clone(), consumer.clone()));
    }

    /// Forget everything.
    pub fn reset(&self) {
        self.windows.lock().clear();
    }

    /// Window size per registration.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DeliveryTracker {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

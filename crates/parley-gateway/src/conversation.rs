//! Transcript of one conversation as a chat view shows it.
//!
//! The view pushes its own sends optimistically and later receives the same
//! message back from the broker; [`Conversation::accept`] drops that second
//! copy by id. The transcript is kept ordered by timestamp, equal timestamps
//! in arrival order.

use parley_core::{Message, MessageId, UserId, sort_by_timestamp};

/// Result of offering a message to a [`Conversation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acceptance {
    /// Added to the transcript.
    Accepted,
    /// Already present.
    Duplicate,
    /// Belongs to another conversation.
    Unrelated {
        /// Addressed to this view's user, so worth a notification.
        incoming: bool,
    },
}

/// Messages exchanged between `me` and `peer`.
#[derive(Clone, Debug)]
pub struct Conversation {
    me: UserId,
    peer: UserId,
    messages: Vec<Message>,
}

impl Conversation {
    /// An empty conversation.
    pub fn new(me: UserId, peer: UserId) -> Self {
        Self {
            me,
            peer,
            messages: Vec::new(),
        }
    }

    /// The local user.
    pub fn me(&self) -> &UserId {
        &self.me
    }

    /// The other participant.
    pub fn peer(&self) -> &UserId {
        &self.peer
    }

    /// The transcript, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages shown.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the transcript is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether a message with `id` is shown.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| m.id == *id)
    }

    /// Replace the transcript with fetched history. Messages from other
    /// conversations and repeated ids are dropped.
    pub fn load_history(&mut self, history: Vec<Message>) {
        self.messages.clear();
        for message in history {
            if message.is_between(&self.me, &self.peer) && !self.contains(&message.id) {
                self.messages.push(message);
            }
        }
        sort_by_timestamp(&mut self.messages);
    }

    /// Show a message the local user just sent.
    pub fn push_local(&mut self, message: Message) -> Acceptance {
        self.accept(message)
    }

    /// Offer a delivered message.
    pub fn accept(&mut self, message: Message) -> Acceptance {
        if !message.is_between(&self.me, &self.peer) {
            return Acceptance::Unrelated {
                incoming: message.to == self.me,
            };
        }
        if self.contains(&message.id) {
            return Acceptance::Duplicate;
        }
        let at = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(at, message);
        Acceptance::Accepted
    }

    /// Messages from the peer not yet marked read.
    pub fn unread_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.from == self.peer && !m.read)
            .count()
    }
}

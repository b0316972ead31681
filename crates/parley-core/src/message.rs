//! The chat message exchanged between two participants.
//!
//! A [`Message`] is created once by its sender and never rewritten: delivery
//! bookkeeping lives in the gateway, and only the conversation store flips
//! the `read` flag.
//!
//! The wire shape is
//! `{ id, from, to, content, timestamp, read }` with an ISO-8601 timestamp.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, ValidationError};
use crate::ids::{MessageId, UserId};

/// A one-to-one chat message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Client-generated unique id.
    pub id: MessageId,
    /// Sender.
    pub from: UserId,
    /// Recipient.
    pub to: UserId,
    /// Text payload.
    pub content: String,
    /// Creation instant, used for ordering.
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Whether the recipient has read it.
    #[serde(default)]
    pub read: bool,
}

/// What a caller supplies to send a message; id and timestamp are assigned
/// at send time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageDraft {
    /// Sender.
    pub from: UserId,
    /// Recipient.
    pub to: UserId,
    /// Text payload.
    pub content: String,
}

impl MessageDraft {
    /// Create a draft.
    pub fn new(from: impl Into<UserId>, to: impl Into<UserId>, content: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            content: content.into(),
        }
    }
}

impl Message {
    /// Build a message from a draft with a fresh id and the current time.
    pub fn compose(draft: MessageDraft) -> Result<Self> {
        Self::compose_at(draft, MessageId::new(), Utc::now())
    }

    /// Build a message from a draft with an explicit id and timestamp.
    ///
    /// The timestamp is truncated to the millisecond precision of the wire
    /// format, so the composed value is exactly what peers will decode.
    pub fn compose_at(draft: MessageDraft, id: MessageId, at: DateTime<Utc>) -> Result<Self> {
        let message = Self {
            id,
            from: draft.from,
            to: draft.to,
            content: draft.content,
            timestamp: at.trunc_subsecs(timestamp::WIRE_SUBSEC_DIGITS),
            read: false,
        };
        message.validate()?;
        Ok(message)
    }

    /// Check the sendable-message invariants.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingId);
        }
        if self.from.is_empty() {
            return Err(ValidationError::MissingParticipant { field: "from" });
        }
        if self.to.is_empty() {
            return Err(ValidationError::MissingParticipant { field: "to" });
        }
        if self.from == self.to {
            return Err(ValidationError::SelfAddressed(self.from.to_string()));
        }
        if self.content.trim().is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        Ok(())
    }

    /// Whether `user` is the sender or the recipient.
    pub fn involves(&self, user: &UserId) -> bool {
        self.from == *user || self.to == *user
    }

    /// Whether this message belongs to the conversation between `a` and `b`,
    /// in either direction.
    pub fn is_between(&self, a: &UserId, b: &UserId) -> bool {
        (self.from == *a && self.to == *b) || (self.from == *b && self.to == *a)
    }

    /// The other participant from `user`'s point of view.
    pub fn counterpart(&self, user: &UserId) -> Option<&UserId> {
        if self.from == *user {
            Some(&self.to)
        } else if self.to == *user {
            Some(&self.from)
        } else {
            None
        }
    }

    /// Parse a message from its JSON wire form.
    pub fn from_json(payload: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Sort messages into transcript order.
///
/// Stable, so messages sharing a timestamp keep their arrival order.
pub fn sort_by_timestamp(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
}

/// ISO-8601 timestamp (de)serialization.
///
/// Serializes as RFC 3339 UTC with millisecond precision. Accepts RFC 3339
/// with any offset, or a local date-time without offset which is taken as
/// UTC (the persistence backend emits those).
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Fractional-second digits carried on the wire.
    pub const WIRE_SUBSEC_DIGITS: u16 = 3;

    /// Serialize a timestamp.
    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    /// Deserialize a timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    /// Parse either an offset or an offset-less ISO-8601 date-time.
    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

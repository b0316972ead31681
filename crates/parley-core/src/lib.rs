//! # parley-core
//!
//! Foundation types, errors, branded IDs, and utilities for Parley messaging.
//!
//! - **Branded IDs**: `UserId`, `MessageId`, `ConsumerId` as newtypes
//! - **Messages**: the immutable one-to-one [`Message`] and its wire format
//! - **Topics**: broker destination naming shared by publisher and subscriber
//! - **Retry**: reconnect delay policy and backoff math
//! - **Logging**: `tracing` subscriber setup and test capture

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod message;
pub mod retry;
pub mod topics;

pub use errors::ValidationError;
pub use ids::{ConsumerId, MessageId, UserId};
pub use message::{Message, MessageDraft, sort_by_timestamp};
pub use retry::{ReconnectConfig, ReconnectMode};
pub use topics::{TopicKind, TopicNames};

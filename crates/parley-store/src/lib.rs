//! # parley-store
//!
//! Conversation history and read state, served by the chat backend's REST
//! API. The messaging gateway never calls this; chat views use it to load a
//! transcript before live messages arrive.

#![deny(unsafe_code)]

pub mod error;
pub mod rest;

use async_trait::async_trait;
use parley_core::{Message, UserId};

pub use error::{Result, StoreError};
pub use rest::RestConversationStore;

/// Persistent message history.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Messages exchanged between `a` and `b`, oldest first.
    async fn history(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>>;

    /// Mark every message from `from` to `to` as read.
    async fn mark_read(&self, from: &UserId, to: &UserId) -> Result<()>;

    /// Unread messages addressed to `user`, oldest first.
    async fn unread(&self, user: &UserId) -> Result<Vec<Message>>;
}

//! Gateway error types.

use parley_core::ValidationError;
use thiserror::Error;

/// Why a send was not accepted.
#[derive(Debug, Error)]
pub enum SendError {
    /// No live broker connection; the message was not queued.
    #[error("message sending is currently unavailable")]
    Offline,

    /// The draft failed validation.
    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationError),

    /// The message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

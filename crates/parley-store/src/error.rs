//! Conversation store errors.

use thiserror::Error;

/// Errors from the conversation store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The base URL cannot carry path segments.
    #[error("invalid store url {url}: {reason}")]
    InvalidUrl {
        /// The configured URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The request never produced a response.
    #[error("store request failed: {message}")]
    Request {
        /// Transport-level description.
        message: String,
    },

    /// The store answered with a non-success status.
    #[error("store returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The response body was not the expected JSON.
    #[error("failed to decode store response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

//! Transport error types.

use thiserror::Error;

/// Errors raised by the broker connection.
///
/// Everything except [`TransportError::SessionBusy`], [`TransportError::GaveUp`]
/// and [`TransportError::Closed`] is recoverable: the session reports it and
/// schedules a reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection or STOMP handshake could not be completed.
    #[error("handshake failed: {reason}")]
    Handshake {
        /// What went wrong.
        reason: String,
    },

    /// The handshake did not complete in time.
    #[error("handshake timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// How long we waited.
        timeout_ms: u64,
    },

    /// The broker answered with an ERROR frame.
    #[error("broker rejected the session: {reason}")]
    Rejected {
        /// The broker's message header.
        reason: String,
    },

    /// An established connection went away.
    #[error("connection dropped: {reason}")]
    Dropped {
        /// Close reason, if known.
        reason: String,
    },

    /// Nothing arrived from the broker within the heartbeat window.
    #[error("no broker heartbeat for {silent_ms}ms")]
    HeartbeatTimeout {
        /// How long the broker has been silent.
        silent_ms: u64,
    },

    /// A frame could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A session for a different user is still active.
    #[error("session already active for {active}, cannot connect {requested}")]
    SessionBusy {
        /// User owning the active session.
        active: String,
        /// User that asked to connect.
        requested: String,
    },

    /// The reconnect policy ran out of attempts.
    #[error("gave up after {attempts} failed connection attempts")]
    GaveUp {
        /// Consecutive failed attempts.
        attempts: u32,
    },

    /// The session was shut down before the operation completed.
    #[error("session closed")]
    Closed,
}

impl TransportError {
    /// Whether the session keeps retrying after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::SessionBusy { .. } | Self::GaveUp { .. } | Self::Closed
        )
    }
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failures_are_recoverable() {
        assert!(TransportError::Handshake { reason: "refused".into() }.is_recoverable());
        assert!(TransportError::ConnectTimeout { timeout_ms: 10 }.is_recoverable());
        assert!(TransportError::Dropped { reason: "eof".into() }.is_recoverable());
        assert!(TransportError::HeartbeatTimeout { silent_ms: 8000 }.is_recoverable());
        assert!(TransportError::Rejected { reason: "bad".into() }.is_recoverable());
    }

    #[test]
    fn lifecycle_errors_are_terminal() {
        let busy = TransportError::SessionBusy {
            active: "u1".into(),
            requested: "u2".into(),
        };
        assert!(!busy.is_recoverable());
        assert!(!TransportError::GaveUp { attempts: 3 }.is_recoverable());
        assert!(!TransportError::Closed.is_recoverable());
    }

    #[test]
    fn busy_display_names_both_users() {
        let err = TransportError::SessionBusy {
            active: "u1".into(),
            requested: "u2".into(),
        };
        let text = err.to_string();
        assert!(text.contains("u1") && text.contains("u2"));
    }
}

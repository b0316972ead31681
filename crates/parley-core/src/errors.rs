//! Message validation errors.

use thiserror::Error;

/// Why a message draft or an inbound message was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The content is empty or whitespace only.
    #[error("message content is empty")]
    EmptyContent,

    /// A participant field is empty.
    #[error("message {field} participant is empty")]
    MissingParticipant {
        /// Which side is missing (`from` or `to`).
        field: &'static str,
    },

    /// Sender and recipient are the same participant.
    #[error("message is addressed to its own sender {0}")]
    SelfAddressed(String),

    /// The message id is empty.
    #[error("message id is empty")]
    MissingId,
}

/// Result type for validation.
pub type Result<T> = std::result::Result<T, ValidationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_display() {
        assert_eq!(
            ValidationError::EmptyContent.to_string(),
            "message content is empty"
        );
    }

    #[test]
    fn missing_participant_names_field() {
        let err = ValidationError::MissingParticipant { field: "to" };
        assert_eq!(err.to_string(), "message to participant is empty");
    }

    #[test]
    fn self_addressed_includes_user() {
        let err = ValidationError::SelfAddressed("u1".into());
        assert!(err.to_string().contains("u1"));
    }
}

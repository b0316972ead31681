//! Errors raised while loading `~/.parley/settings.json`.

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not valid JSON, or a section has the wrong shape.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A value parsed but the session or gateway cannot run with it.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Dotted camelCase path of the offending key, e.g. `broker.url`.
        key: &'static str,
        /// What the value must satisfy.
        reason: &'static str,
    },
}

impl SettingsError {
    pub(crate) fn invalid(key: &'static str, reason: &'static str) -> Self {
        Self::InvalidValue { key, reason }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_file_mentions_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{broker").unwrap_err();
        let err = SettingsError::Json(json_err);
        assert!(err.to_string().contains("parse settings JSON"));
    }

    #[test]
    fn invalid_value_names_the_key() {
        let err = SettingsError::invalid("delivery.dedupCapacity", "must be positive");
        assert_eq!(err.to_string(), "invalid value for delivery.dedupCapacity: must be positive");
    }

    #[test]
    fn unreadable_file_is_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SettingsError = io_err.into();
        assert!(matches!(err, SettingsError::Io(_)));
    }
}

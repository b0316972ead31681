//! Branded ID newtypes for type safety.
//!
//! Participants, messages and handler registrations each get a distinct ID
//! type implemented as a newtype wrapper around `String`, so a consumer ID
//! can never be passed where a user ID is expected.
//!
//! Generated IDs are UUID v7 (time-ordered) with a short type prefix.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new prefixed UUID v7 string (time-ordered).
fn new_v7(prefix: &str) -> String {
    format!("{prefix}{}", Uuid::now_v7())
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (prefixed UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7($prefix))
            }

            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Opaque identifier of a chat participant, supplied by the directory.
    UserId, "user-"
}

branded_id! {
    /// Client-generated identifier of a single message.
    MessageId, "msg-"
}

branded_id! {
    /// Identifier of one handler registration (typically one open chat view).
    ConsumerId, "view-"
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_new_is_prefixed_uuid_v7() {
        let id = MessageId::new();
        let raw = id.as_str().strip_prefix("msg-").expect("msg- prefix");
        let parsed = Uuid::parse_str(raw).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn consumer_id_has_view_prefix() {
        assert!(ConsumerId::new().starts_with("view-"));
    }

    #[test]
    fn ids_are_unique() {
        let a = MessageId::new();
        let b = MessageId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_str_ref() {
        let id = UserId::from("u1");
        assert_eq!(id.as_str(), "u1");
    }

    #[test]
    fn deref_to_str() {
        let id = UserId::from("hello");
        let s: &str = &id;
        assert_eq!(s, "hello");
    }

    #[test]
    fn display() {
        let id = ConsumerId::from("chat-window");
        assert_eq!(format!("{id}"), "chat-window");
    }

    #[test]
    fn into_string() {
        let id = MessageId::from("m1");
        let s: String = id.into();
        assert_eq!(s, "m1");
    }

    #[test]
    fn serde_is_transparent() {
        let id = UserId::from("u2");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"u2\"");
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

//! Broker destination naming.
//!
//! Two logical topics matter to a client: the user's personal inbox and the
//! global channel every client listens to. Sent messages additionally go to
//! an application destination where the backend persists them. Publisher and
//! subscriber must agree on these names, so they live in one place.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Default prefix of the per-user inbox topic.
pub const DEFAULT_PERSONAL_PREFIX: &str = "/topic/messages/";
/// Default global topic.
pub const DEFAULT_GLOBAL_TOPIC: &str = "/topic/messages";
/// Default server-side persistence destination.
pub const DEFAULT_APP_DESTINATION: &str = "/app/chat";

/// Which logical feed a frame arrived on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TopicKind {
    /// Inbox of the given user.
    Personal(UserId),
    /// The shared channel.
    Global,
}

/// Destination names used on the broker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicNames {
    /// Prefix of the per-user inbox; the user id is appended.
    #[serde(default = "default_personal_prefix")]
    pub personal_prefix: String,
    /// Topic every connected client subscribes to.
    #[serde(default = "default_global")]
    pub global: String,
    /// Destination the backend consumes to persist sent messages.
    #[serde(default = "default_app_destination")]
    pub app_destination: String,
}

fn default_personal_prefix() -> String {
    DEFAULT_PERSONAL_PREFIX.into()
}
fn default_global() -> String {
    DEFAULT_GLOBAL_TOPIC.into()
}
fn default_app_destination() -> String {
    DEFAULT_APP_DESTINATION.into()
}

impl Default for TopicNames {
    fn default() -> Self {
        Self {
            personal_prefix: default_personal_prefix(),
            global: default_global(),
            app_destination: default_app_destination(),
        }
    }
}

impl TopicNames {
    /// Inbox topic of `user`.
    pub fn personal(&self, user: &UserId) -> String {
        format!("{}{user}", self.personal_prefix)
    }

    /// Classify a destination as one of the two logical feeds.
    pub fn classify(&self, destination: &str) -> Option<TopicKind> {
        if destination == self.global {
            return Some(TopicKind::Global);
        }
        destination
            .strip_prefix(&self.personal_prefix)
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(|rest| TopicKind::Personal(UserId::from(rest)))
    }
}

//! The seam between the session and a concrete broker.
//!
//! A [`Connector`] performs one connection attempt including the protocol
//! handshake and hands back a [`Link`]: a pair of channels carrying frames.
//! The session owns retries; connectors never reconnect on their own.

use std::fmt;

use async_trait::async_trait;
use parley_core::UserId;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::frame::{ClientFrame, LinkEvent};
use crate::heartbeat::{HeartbeatConfig, HeartbeatTimings};

/// Channel capacity for both directions of a link.
pub const LINK_BUFFER: usize = 1024;

/// Opaque auth credential forwarded to the broker handshake.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    token: Option<String>,
}

impl Credentials {
    /// No credential.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A bearer token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// The token, if any.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = if self.token.is_some() { "<redacted>" } else { "<none>" };
        f.debug_struct("Credentials").field("token", &token).finish()
    }
}

/// Everything a connector needs for one attempt.
#[derive(Clone, Debug)]
pub struct ConnectRequest {
    /// User the session belongs to.
    pub user_id: UserId,
    /// Credential for the handshake.
    pub credentials: Credentials,
    /// Heartbeat intervals to propose.
    pub heartbeat: HeartbeatConfig,
}

/// An established, handshaken connection.
///
/// Dropping `outbound` closes the connection.
#[derive(Debug)]
pub struct Link {
    /// Frames to the broker.
    pub outbound: mpsc::Sender<ClientFrame>,
    /// Frames and close notifications from the broker.
    pub inbound: mpsc::Receiver<LinkEvent>,
    /// Heartbeat intervals agreed during the handshake.
    pub heartbeat: HeartbeatTimings,
}

/// Opens connections to a broker.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect and complete the handshake.
    async fn open(&self, request: &ConnectRequest) -> Result<Link>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_redacts_token() {
        let text = format!("{:?}", Credentials::bearer("secret-token"));
        assert!(!text.contains("secret-token"));
        assert!(text.contains("redacted"));
    }

    #[test]
    fn anonymous_has_no_token() {
        assert!(Credentials::anonymous().token().is_none());
        assert_eq!(Credentials::bearer("t").token(), Some("t"));
    }
}

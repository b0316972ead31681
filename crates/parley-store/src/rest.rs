//! `reqwest` implementation of [`ConversationStore`].

use std::time::Duration;

use async_trait::async_trait;
use parley_core::{Message, UserId, sort_by_timestamp};
use reqwest::{Method, Url};
use tracing::{debug, instrument, warn};

use crate::error::{Result, StoreError};
use crate::ConversationStore;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Client for the `/api/messages` endpoints.
#[derive(Clone, Debug)]
pub struct RestConversationStore {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl RestConversationStore {
    /// Client for the service at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| StoreError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(StoreError::InvalidUrl {
                url: base_url.to_string(),
                reason: "not a hierarchical url".into(),
            });
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoreError::Request {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base,
            token: None,
        })
    }

    /// Send `token` as a bearer credential on every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// `<base>/api/messages/<segments...>`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            let _ = path.pop_if_empty().extend(["api", "messages"]).extend(segments);
        }
        url
    }

    async fn call(&self, method: Method, url: Url) -> Result<String> {
        debug!(%method, %url, "store request");
        let mut request = self.client.request(method, url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| StoreError::Request {
            message: e.to_string(),
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| StoreError::Request {
            message: format!("failed to read response body: {e}"),
        })?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "store request rejected");
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn messages(&self, url: Url) -> Result<Vec<Message>> {
        let body = self.call(Method::GET, url).await?;
        let mut messages: Vec<Message> = serde_json::from_str(&body)?;
        sort_by_timestamp(&mut messages);
        Ok(messages)
    }
}

#[async_trait]
impl ConversationStore for RestConversationStore {
    #[instrument(skip(self), fields(a = %a, b = %b))]
    async fn history(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        self.messages(self.endpoint(&[a.as_str(), b.as_str()])).await
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    async fn mark_read(&self, from: &UserId, to: &UserId) -> Result<()> {
        let url = self.endpoint(&["read", from.as_str(), to.as_str()]);
        let _ = self.call(Method::PUT, url).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user = %user))]
    async fn unread(&self, user: &UserId) -> Result<Vec<Message>> {
        self.messages(self.endpoint(&["unread", user.as_str()])).await
    }
}

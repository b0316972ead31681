//! Build runtime components from loaded settings.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parley_gateway::{GatewayConfig, MessageGateway};
use parley_settings::ParleySettings;
use parley_store::RestConversationStore;
use parley_transport::{HeartbeatConfig, SessionConfig, TransportSession, WebSocketConnector};

/// Session tunables from the `broker` and `reconnect` sections.
pub fn session_config(settings: &ParleySettings) -> SessionConfig {
    SessionConfig {
        heartbeat: HeartbeatConfig::from_millis(
            settings.broker.heartbeat_outgoing_ms,
            settings.broker.heartbeat_incoming_ms,
        ),
        reconnect: settings.reconnect.clone(),
        connect_timeout: settings.broker.connect_timeout(),
        command_buffer: settings.broker.command_buffer,
    }
}

/// Gateway tunables from the `topics` and `delivery` sections.
pub fn gateway_config(settings: &ParleySettings) -> GatewayConfig {
    GatewayConfig {
        topics: settings.topics.clone(),
        dedup_capacity: settings.delivery.dedup_capacity,
    }
}

/// A gateway speaking STOMP over WebSocket to the configured broker.
pub fn gateway(settings: &ParleySettings) -> MessageGateway {
    let connector = Arc::new(WebSocketConnector::new(settings.broker.url.clone()));
    let session = Arc::new(TransportSession::new(connector, session_config(settings)));
    MessageGateway::new(session, gateway_config(settings))
}

/// REST client for the configured store.
pub fn store(settings: &ParleySettings, token: Option<&str>) -> Result<RestConversationStore> {
    let store = RestConversationStore::new(
        &settings.store.base_url,
        Duration::from_millis(settings.store.timeout_ms),
    )
    .with_context(|| format!("invalid store url {}", settings.store.base_url))?;
    Ok(match token {
        Some(token) => store.with_token(token),
        None => store,
    })
}

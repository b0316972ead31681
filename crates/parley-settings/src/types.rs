//! Settings types with compiled defaults.
//!
//! Every field has a serde default so a partial `settings.json` only needs
//! the keys it changes.

use std::time::Duration;

use parley_core::{ReconnectConfig, TopicNames};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParleySettings {
    /// Broker connection.
    #[serde(default)]
    pub broker: BrokerSettings,
    /// Reconnect policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Destination names.
    #[serde(default)]
    pub topics: TopicNames,
    /// Delivery bookkeeping.
    #[serde(default)]
    pub delivery: DeliverySettings,
    /// Conversation store REST API.
    #[serde(default)]
    pub store: StoreSettings,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl ParleySettings {
    /// Reject combinations the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.broker.url.is_empty() {
            return Err(SettingsError::invalid("broker.url", "must not be empty"));
        }
        if self.broker.heartbeat_outgoing_ms > 0 && self.broker.heartbeat_outgoing_ms < 100 {
            return Err(SettingsError::invalid(
                "broker.heartbeatOutgoingMs",
                "must be 0 or at least 100",
            ));
        }
        if self.reconnect.delay_ms == 0 {
            return Err(SettingsError::invalid("reconnect.delayMs", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_factor) {
            return Err(SettingsError::invalid("reconnect.jitterFactor", "must be within 0.0..=1.0"));
        }
        if self.delivery.dedup_capacity == 0 {
            return Err(SettingsError::invalid("delivery.dedupCapacity", "must be positive"));
        }
        Ok(())
    }
}

/// Broker connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSettings {
    /// WebSocket URL of the STOMP endpoint.
    #[serde(default = "default_broker_url")]
    pub url: String,
    /// Expected interval of broker heartbeats in ms; 0 disables the check.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_incoming_ms: u64,
    /// Interval of client heartbeats in ms; 0 disables them.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_outgoing_ms: u64,
    /// Handshake timeout in ms.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Capacity of the session command channel.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

fn default_broker_url() -> String {
    "ws://localhost:8080/ws".into()
}
fn default_heartbeat_ms() -> u64 {
    4000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_command_buffer() -> usize {
    256
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            heartbeat_incoming_ms: default_heartbeat_ms(),
            heartbeat_outgoing_ms: default_heartbeat_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            command_buffer: default_command_buffer(),
        }
    }
}

impl BrokerSettings {
    /// Handshake timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Delivery bookkeeping settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySettings {
    /// How many recent message ids each registration remembers for dedup.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

fn default_dedup_capacity() -> usize {
    1024
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

/// Conversation store settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSettings {
    /// Base URL of the REST backend.
    #[serde(default = "default_store_url")]
    pub base_url: String,
    /// Request timeout in ms.
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_store_url() -> String {
    "http://localhost:8080".into()
}
fn default_store_timeout_ms() -> u64 {
    15_000
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            base_url: default_store_url(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSettings {
    /// Filter directive handed to the tracing subscriber.
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    parley_core::logging::DEFAULT_LEVEL.into()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

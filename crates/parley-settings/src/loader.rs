//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ParleySettings::default()`]
//! 2. If `~/.parley/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `PARLEY_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use parley_core::ReconnectMode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::ParleySettings;

/// Resolve the path to the settings file (`~/.parley/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".parley").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ParleySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ParleySettings> {
    let mut settings = read_layered(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_layered(path: &Path) -> Result<ParleySettings> {
    let defaults = serde_json::to_value(ParleySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (falling back to file/default).
pub fn apply_env_overrides(settings: &mut ParleySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// Split out from [`apply_env_overrides`] so tests need not touch the
/// process environment.
pub fn apply_overrides(settings: &mut ParleySettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let number = |name: &str, min: u64, max: u64| {
        let val = lookup(name)?;
        let parsed = parse_u64_range(&val, min, max);
        if parsed.is_none() {
            warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        parsed
    };

    // ── Broker ──────────────────────────────────────────────────────
    if let Some(v) = string("PARLEY_BROKER_URL") {
        settings.broker.url = v;
    }
    if let Some(v) = number("PARLEY_HEARTBEAT_INCOMING_MS", 0, 600_000) {
        settings.broker.heartbeat_incoming_ms = v;
    }
    if let Some(v) = number("PARLEY_HEARTBEAT_OUTGOING_MS", 0, 600_000) {
        settings.broker.heartbeat_outgoing_ms = v;
    }

    // ── Reconnect ───────────────────────────────────────────────────
    if let Some(v) = string("PARLEY_RECONNECT_MODE") {
        match parse_mode(&v) {
            Some(mode) => settings.reconnect.mode = mode,
            None => warn!(key = "PARLEY_RECONNECT_MODE", value = %v, "invalid reconnect mode, ignoring"),
        }
    }
    if let Some(v) = number("PARLEY_RECONNECT_DELAY_MS", 100, 3_600_000) {
        settings.reconnect.delay_ms = v;
    }
    if let Some(v) = number("PARLEY_RECONNECT_MAX_ATTEMPTS", 1, u64::from(u32::MAX)) {
        settings.reconnect.max_attempts = u32::try_from(v).ok();
    }

    // ── Store / logging ─────────────────────────────────────────────
    if let Some(v) = string("PARLEY_STORE_URL") {
        settings.store.base_url = v;
    }
    if let Some(v) = string("PARLEY_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a reconnect mode name (case-insensitive).
pub fn parse_mode(val: &str) -> Option<ReconnectMode> {
    match val.to_lowercase().as_str() {
        "fixed" => Some(ReconnectMode::Fixed),
        "backoff" | "exponential" => Some(ReconnectMode::Backoff),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Reconnect timing and backoff calculation.
//!
//! Sync-only building blocks; the transport session owns the async retry
//! loop and supplies the randomness.
//!
//! - [`ReconnectConfig`]: fixed-delay or backoff parameters
//! - [`calculate_backoff_delay`]: exponential backoff, capped, no jitter
//! - [`calculate_backoff_delay_with_random`]: the same with symmetric jitter

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default delay between reconnect attempts in milliseconds.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;
/// Default cap for backoff mode in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
/// Default jitter factor (0.0–1.0) for backoff mode.
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// How the delay between attempts evolves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectMode {
    /// Same delay before every attempt.
    #[default]
    Fixed,
    /// Delay doubles per attempt up to `max_delay_ms`, with jitter.
    Backoff,
}

/// Reconnect parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    /// Delay policy (default: fixed).
    #[serde(default)]
    pub mode: ReconnectMode,
    /// Fixed delay, or backoff base delay, in ms (default: 5000).
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Backoff cap in ms (default: 60000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff jitter 0.0–1.0 (default: 0.2).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Give up after this many consecutive failed attempts; `None` retries
    /// forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            mode: ReconnectMode::Fixed,
            delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Fixed-delay policy.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            mode: ReconnectMode::Fixed,
            delay_ms: duration_ms(delay),
            ..Self::default()
        }
    }

    /// Exponential backoff policy.
    pub fn backoff(base: Duration, max: Duration) -> Self {
        Self {
            mode: ReconnectMode::Backoff,
            delay_ms: duration_ms(base),
            max_delay_ms: duration_ms(max),
            ..Self::default()
        }
    }

    /// Limit consecutive failed attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Whether another attempt is allowed after `failed` consecutive failures.
    pub fn allows_attempt(&self, failed: u32) -> bool {
        self.max_attempts.is_none_or(|max| failed < max)
    }

    /// Delay before attempt number `attempt` (zero-based), given a random
    /// value in `[0.0, 1.0)`.
    pub fn delay_for(&self, attempt: u32, random: f64) -> Duration {
        let ms = match self.mode {
            ReconnectMode::Fixed => self.delay_ms,
            ReconnectMode::Backoff => calculate_backoff_delay_with_random(
                attempt,
                self.delay_ms,
                self.max_delay_ms,
                self.jitter_factor,
                random,
            ),
        };
        Duration::from_millis(ms)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Exponential backoff without jitter: `min(max_delay, base_delay * 2^attempt)`.
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    base_delay_ms
        .saturating_mul(1u64 << attempt.min(31))
        .min(max_delay_ms)
}

/// Exponential backoff with symmetric jitter.
///
/// `random` should be a value in `[0.0, 1.0)` from a PRNG; it maps to a
/// multiplier in `[1 - jitter, 1 + jitter]`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let capped = calculate_backoff_delay(attempt, base_delay_ms, max_delay_ms);
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = (capped as f64) * jitter;

    with_jitter.round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

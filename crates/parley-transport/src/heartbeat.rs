//! Heartbeat negotiation and liveness tracking.
//!
//! STOMP heart-beating: the client proposes `cx,cy` (can send every `cx` ms,
//! wants to receive every `cy` ms), the broker answers `sx,sy`. The client
//! then sends every `max(cx, sy)` ms and expects traffic every `max(cy, sx)`
//! ms; a zero on either side disables that direction.

use std::time::Duration;

use tokio::time::Instant;

/// How many expected intervals may pass in silence before the link is dead.
pub const MISSED_BEATS_ALLOWED: u32 = 2;

/// Heartbeat intervals the client asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// How often the client can send heartbeats; zero disables.
    pub outgoing: Duration,
    /// How often the client wants to hear from the broker; zero disables.
    pub incoming: Duration,
}

impl HeartbeatConfig {
    /// Heart-beating switched off in both directions.
    pub const DISABLED: Self = Self {
        outgoing: Duration::ZERO,
        incoming: Duration::ZERO,
    };

    /// Build from millisecond values.
    pub fn from_millis(outgoing_ms: u64, incoming_ms: u64) -> Self {
        Self {
            outgoing: Duration::from_millis(outgoing_ms),
            incoming: Duration::from_millis(incoming_ms),
        }
    }

    /// The `heart-beat` header value pair in ms.
    pub fn as_header(&self) -> (u64, u64) {
        (millis(self.outgoing), millis(self.incoming))
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::from_millis(4000, 4000)
    }
}

/// Intervals agreed with the broker for one link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeartbeatTimings {
    /// Send a heartbeat this often, if any.
    pub send_every: Option<Duration>,
    /// Expect broker traffic this often, if any.
    pub expect_every: Option<Duration>,
}

/// Negotiate timings from the client proposal and the broker's
/// `heart-beat` header (absent or malformed means `0,0`).
pub fn negotiate(client: HeartbeatConfig, server_header: Option<&str>) -> HeartbeatTimings {
    let (sx, sy) = server_header.and_then(parse_header).unwrap_or((0, 0));
    let (cx, cy) = client.as_header();

    let pick = |ours: u64, theirs: u64| {
        (ours > 0 && theirs > 0).then(|| Duration::from_millis(ours.max(theirs)))
    };

    HeartbeatTimings {
        send_every: pick(cx, sy),
        expect_every: pick(cy, sx),
    }
}

fn parse_header(value: &str) -> Option<(u64, u64)> {
    let (a, b) = value.split_once(',')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Tracks when the broker was last heard from.
#[derive(Debug)]
pub struct Liveness {
    last_inbound: Instant,
}

impl Liveness {
    /// Start tracking now.
    pub fn new() -> Self {
        Self {
            last_inbound: Instant::now(),
        }
    }

    /// Record inbound traffic (any frame counts).
    pub fn mark(&mut self) {
        self.last_inbound = Instant::now();
    }

    /// Time since the last inbound traffic.
    pub fn silence(&self) -> Duration {
        self.last_inbound.elapsed()
    }

    /// Whether the broker has been silent longer than the allowed window.
    pub fn is_stale(&self, expect_every: Duration) -> bool {
        self.silence() > expect_every * MISSED_BEATS_ALLOWED
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_takes_the_larger_interval() {
        let t = negotiate(HeartbeatConfig::from_millis(4000, 4000), Some("10000,2000"));
        assert_eq!(t.send_every, Some(Duration::from_millis(4000)));
        assert_eq!(t.expect_every, Some(Duration::from_millis(10_000)));
    }

    #[test]
    fn zero_on_either_side_disables() {
        let t = negotiate(HeartbeatConfig::from_millis(4000, 0), Some("0,5000"));
        assert_eq!(t.send_every, Some(Duration::from_millis(5000)));
        assert_eq!(t.expect_every, None);

        let t = negotiate(HeartbeatConfig::DISABLED, Some("1000,1000"));
        assert_eq!(t, HeartbeatTimings::default());
    }

    #[test]
    fn missing_or_bad_header_disables() {
        let client = HeartbeatConfig::default();
        assert_eq!(negotiate(client, None), HeartbeatTimings::default());
        assert_eq!(negotiate(client, Some("fast")), HeartbeatTimings::default());
    }

    #[test]
    fn header_pair() {
        assert_eq!(HeartbeatConfig::default().as_header(), (4000, 4000));
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_goes_stale_after_missed_beats() {
        let mut live = Liveness::new();
        let every = Duration::from_millis(100);
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(!live.is_stale(every));
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(live.is_stale(every));
        live.mark();
        assert!(!live.is_stale(every));
    }
}

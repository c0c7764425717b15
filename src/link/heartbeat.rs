//! Ping/pong keepalive bookkeeping.
//!
//! [`Heartbeat`] does no I/O. The owner polls it with the current time and
//! acts on the returned [`HeartbeatAction`]:
//!
//! | State | Condition | Action |
//! |-------|-----------|--------|
//! | idle | `interval_ms` since open or last pong | `Ping` |
//! | waiting | pong arrives | back to idle, miss count reset |
//! | waiting | no pong within `timeout_ms`, misses < max | `Ping` again |
//! | waiting | no pong within `timeout_ms`, misses = max | `Expired` |

use crate::config::HeartbeatConfig;

/// What the owner should do now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping.
    Ping,
    /// Too many pongs missed; drop the connection.
    Expired,
}

/// Keepalive state for one connection.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    next_ping_at_ms: u64,
    awaiting_since_ms: Option<u64>,
    missed: u8,
}

impl Heartbeat {
    /// Starts the heartbeat for a connection opened at `now_ms`.
    #[must_use]
    pub fn new(config: HeartbeatConfig, now_ms: u64) -> Self {
        Self {
            config,
            next_ping_at_ms: now_ms.saturating_add(config.interval_ms),
            awaiting_since_ms: None,
            missed: 0,
        }
    }

    /// Advances the heartbeat to `now_ms`.
    pub fn poll(&mut self, now_ms: u64) -> Option<HeartbeatAction> {
        if let Some(sent_at) = self.awaiting_since_ms {
            if now_ms.saturating_sub(sent_at) < self.config.timeout_ms {
                return None;
            }

            self.missed = self.missed.saturating_add(1);
            if self.missed >= self.config.max_missed {
                return Some(HeartbeatAction::Expired);
            }

            self.awaiting_since_ms = Some(now_ms);
            return Some(HeartbeatAction::Ping);
        }

        if now_ms >= self.next_ping_at_ms {
            self.awaiting_since_ms = Some(now_ms);
            return Some(HeartbeatAction::Ping);
        }

        None
    }

    /// Records a pong.
    pub fn on_pong(&mut self, now_ms: u64) {
        self.awaiting_since_ms = None;
        self.missed = 0;
        self.next_ping_at_ms = now_ms.saturating_add(self.config.interval_ms);
    }

    /// Consecutive pongs missed so far.
    #[inline]
    #[must_use]
    pub fn missed(&self) -> u8 {
        self.missed
    }

    /// Returns `true` while a ping is outstanding.
    #[inline]
    #[must_use]
    pub fn is_awaiting_pong(&self) -> bool {
        self.awaiting_since_ms.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat() -> Heartbeat {
        Heartbeat::new(HeartbeatConfig::default(), 1_000)
    }

    #[test]
    fn test_pings_after_interval() {
        let mut hb = heartbeat();
        assert_eq!(hb.poll(1_000), None);
        assert_eq!(hb.poll(15_999), None);
        assert_eq!(hb.poll(16_000), Some(HeartbeatAction::Ping));
        assert!(hb.is_awaiting_pong());
        assert_eq!(hb.poll(16_001), None);
    }

    #[test]
    fn test_pong_resets() {
        let mut hb = heartbeat();
        hb.poll(16_000);
        hb.on_pong(16_500);

        assert!(!hb.is_awaiting_pong());
        assert_eq!(hb.missed(), 0);
        assert_eq!(hb.poll(31_499), None);
        assert_eq!(hb.poll(31_500), Some(HeartbeatAction::Ping));
    }

    #[test]
    fn test_expires_after_max_missed() {
        let mut hb = heartbeat();
        assert_eq!(hb.poll(16_000), Some(HeartbeatAction::Ping));

        // First miss re-pings at once.
        assert_eq!(hb.poll(18_999), None);
        assert_eq!(hb.poll(19_000), Some(HeartbeatAction::Ping));
        assert_eq!(hb.missed(), 1);

        // Second miss hits the limit of 2.
        assert_eq!(hb.poll(22_000), Some(HeartbeatAction::Expired));
        assert_eq!(hb.missed(), 2);
    }

    #[test]
    fn test_late_pong_after_one_miss_recovers() {
        let mut hb = heartbeat();
        hb.poll(16_000);
        hb.poll(19_000);
        assert_eq!(hb.missed(), 1);

        hb.on_pong(19_100);
        assert_eq!(hb.missed(), 0);
        assert_eq!(hb.poll(22_000), None);
    }
}

//! Exponential backoff with full jitter for reconnecting sinks.

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Reconnect delay schedule. The delay before retry `k` is drawn
/// uniformly from `[0, min(cap_ms, base_ms * 2^k)]`. After
/// `reset_after_ms` of continuous healthy operation the exponent resets.
/// When `deadline_ms` is set and an outage outlasts it, pending records
/// are dropped and retries continue at the cap cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub reset_after_ms: u64,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            base_ms: 100,
            cap_ms: 30_000,
            reset_after_ms: 60_000,
            deadline_ms: None,
        }
    }
}

/// Mutable reconnect state, owned by a sink on its consumer thread.
#[derive(Debug)]
pub(crate) struct Backoff {
    config: BackoffConfig,
    attempt: u32,
    down_since: Option<Instant>,
    next_attempt: Option<Instant>,
    healthy_since: Option<Instant>,
}

impl Backoff {
    pub(crate) fn new(config: BackoffConfig) -> Backoff {
        Backoff {
            config,
            attempt: 0,
            down_since: None,
            next_attempt: None,
            healthy_since: None,
        }
    }

    /// Upper bound of the delay before retry `attempt`.
    pub(crate) fn ceiling(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .base_ms
            .saturating_mul(1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX));
        Duration::from_millis(exp.min(self.config.cap_ms))
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }

    /// Record a failed connect or write and schedule the next attempt.
    pub(crate) fn note_failure(&mut self, now: Instant) {
        if self.down_since.is_none() {
            // Entering the outage; a long enough healthy stretch resets
            // the exponent.
            let reset = Duration::from_millis(self.config.reset_after_ms);
            if self
                .healthy_since
                .is_some_and(|since| now.duration_since(since) >= reset)
            {
                self.attempt = 0;
            }
            self.down_since = Some(now);
            self.healthy_since = None;
        }
        let delay = if self.deadline_exceeded(now) {
            Duration::from_millis(self.config.cap_ms)
        } else {
            self.jittered(self.attempt)
        };
        self.attempt = self.attempt.saturating_add(1);
        self.next_attempt = Some(now + delay);
    }

    /// Record a successful connect or write.
    pub(crate) fn note_success(&mut self, now: Instant) {
        self.down_since = None;
        self.next_attempt = None;
        if self.healthy_since.is_none() {
            self.healthy_since = Some(now);
        }
    }

    /// Whether the outage has outlasted the configured deadline.
    pub(crate) fn deadline_exceeded(&self, now: Instant) -> bool {
        match (self.config.deadline_ms, self.down_since) {
            (Some(deadline), Some(since)) => {
                now.duration_since(since) > Duration::from_millis(deadline)
            }
            _ => false,
        }
    }

    /// Time remaining until the next attempt is due, zero when due now.
    pub(crate) fn until_next_attempt(&self, now: Instant) -> Duration {
        match self.next_attempt {
            Some(at) => at.saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(config: BackoffConfig) -> Backoff {
        Backoff::new(config)
    }

    #[test]
    fn delay_ceilings_follow_the_exponential_curve() {
        let b = backoff(BackoffConfig {
            base_ms: 100,
            cap_ms: 1_000,
            reset_after_ms: 60_000,
            deadline_ms: None,
        });
        assert_eq!(b.ceiling(0), Duration::from_millis(100));
        assert_eq!(b.ceiling(1), Duration::from_millis(200));
        assert_eq!(b.ceiling(2), Duration::from_millis(400));
        assert_eq!(b.ceiling(3), Duration::from_millis(800));
        assert_eq!(b.ceiling(4), Duration::from_millis(1_000));
        assert_eq!(b.ceiling(63), Duration::from_millis(1_000));
    }

    #[test]
    fn jittered_delays_stay_within_the_ceiling() {
        let mut b = backoff(BackoffConfig {
            base_ms: 50,
            cap_ms: 400,
            reset_after_ms: 60_000,
            deadline_ms: None,
        });
        let mut now = Instant::now();
        for attempt in 0..6 {
            b.note_failure(now);
            let wait = b.until_next_attempt(now);
            assert!(
                wait <= b.ceiling(attempt),
                "attempt {attempt}: {wait:?} exceeds {:?}",
                b.ceiling(attempt)
            );
            now += wait;
        }
    }

    #[test]
    fn healthy_stretch_resets_the_exponent() {
        let mut b = backoff(BackoffConfig {
            base_ms: 100,
            cap_ms: 10_000,
            reset_after_ms: 500,
            deadline_ms: None,
        });
        let start = Instant::now();
        b.note_failure(start);
        b.note_failure(start);
        b.note_failure(start);
        assert_eq!(b.attempt, 3);

        b.note_success(start);
        // Healthy for longer than reset_after_ms before the next outage.
        b.note_failure(start + Duration::from_millis(600));
        assert_eq!(b.attempt, 1);
    }

    #[test]
    fn short_recovery_keeps_the_exponent() {
        let mut b = backoff(BackoffConfig {
            base_ms: 100,
            cap_ms: 10_000,
            reset_after_ms: 5_000,
            deadline_ms: None,
        });
        let start = Instant::now();
        b.note_failure(start);
        b.note_failure(start);
        b.note_success(start);
        b.note_failure(start + Duration::from_millis(100));
        assert_eq!(b.attempt, 3);
    }

    #[test]
    fn deadline_clamps_delay_to_cap() {
        let mut b = backoff(BackoffConfig {
            base_ms: 100,
            cap_ms: 300,
            reset_after_ms: 60_000,
            deadline_ms: Some(1_000),
        });
        let start = Instant::now();
        b.note_failure(start);
        assert!(!b.deadline_exceeded(start));
        let late = start + Duration::from_millis(1_500);
        assert!(b.deadline_exceeded(late));
        b.note_failure(late);
        assert_eq!(b.until_next_attempt(late), Duration::from_millis(300));
    }
}

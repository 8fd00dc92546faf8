//! Exponential backoff gate for redelivery
//!
//! A failed message becomes eligible for redelivery once
//! `min(initial_delay * 2^retry_count, max_delay)` has passed since its
//! first failure. The decision is pure: it reads the retry record as stored
//! and never mutates it.

use std::time::Duration;
use tokio::time::Instant;

/// Backoff intervals used by the redelivery gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first redelivery, and the coarse sleep used while a
    /// queued message is still backing off
    pub initial_delay: Duration,
    /// Upper bound on the computed delay
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffConfig {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
        }
    }

    /// Delay owed by a message that has been retried `retry_count` times
    pub fn delay(&self, retry_count: u32) -> Duration {
        backoff_delay(retry_count, self.initial_delay, self.max_delay)
    }

    /// Whether a message first failed at `first_failure` must still wait
    pub fn should_backoff(&self, first_failure: Instant, retry_count: u32) -> bool {
        should_backoff(
            first_failure,
            retry_count,
            self.initial_delay,
            self.max_delay,
            Instant::now(),
        )
    }
}

/// `min(base * 2^retry_count, max)`, saturating at `max` on overflow
pub fn backoff_delay(retry_count: u32, base: Duration, max: Duration) -> Duration {
    1u32.checked_shl(retry_count)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(max, |delay| delay.min(max))
}

/// Returns true while redelivery must be suppressed
///
/// `now` is explicit so callers (and tests) control the clock.
pub fn should_backoff(
    first_failure: Instant,
    retry_count: u32,
    base: Duration,
    max: Duration,
    now: Instant,
) -> bool {
    now.saturating_duration_since(first_failure) < backoff_delay(retry_count, base, max)
}

//! Retry strategy: exponential backoff with jitter.
//!
//! Pure calculation. Time comes from the injected `Clock` and jitter from
//! the injected `DeterministicRng`; nothing here performs I/O.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use relay_core::clock::Clock;
use relay_core::rng::DeterministicRng;

/// Jitter band applied to every computed delay (±10%).
pub const JITTER_RATIO: f64 = 0.1;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retry budget stamped on every new event.
    pub max_retries: i32,
    /// Delay before the first retry.
    pub base_delay: StdDuration,
    /// Ceiling on any single delay.
    pub max_delay: StdDuration,
    /// Growth factor between consecutive retries.
    pub exponential_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: StdDuration::from_secs(1),
            max_delay: StdDuration::from_secs(300),
            exponential_factor: 2.0,
        }
    }
}

/// A computed retry schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrySchedule {
    /// When the retry becomes eligible.
    pub next_retry_at: DateTime<Utc>,
    /// The jittered, clamped delay that produced `next_retry_at`.
    pub delay: Duration,
    /// The clamped delay without jitter, for display.
    pub estimated_delay: Duration,
}

impl RetryPolicy {
    fn raw_delay_ms(&self, retry_count: i32) -> f64 {
        self.base_delay.as_secs_f64() * 1_000.0 * self.exponential_factor.powi(retry_count)
    }

    fn max_delay_ms(&self) -> f64 {
        self.max_delay.as_secs_f64() * 1_000.0
    }

    /// The clamped delay for `retry_count`, without jitter.
    #[must_use]
    pub fn estimated_delay(&self, retry_count: i32) -> Duration {
        millis(self.raw_delay_ms(retry_count).min(self.max_delay_ms()))
    }

    /// Computes when the retry following `retry_count` prior attempts may run.
    ///
    /// The raw delay `base_delay * exponential_factor ^ retry_count` is
    /// scaled by a uniform factor in `[0.9, 1.1)` and then clamped to
    /// `max_delay`; the clamped value is what gets scheduled.
    #[must_use]
    pub fn next_retry_time(
        &self,
        retry_count: i32,
        clock: &dyn Clock,
        rng: &mut dyn DeterministicRng,
    ) -> RetrySchedule {
        let jitter = 1.0 + (rng.next_f64() * 2.0 - 1.0) * JITTER_RATIO;
        let delay = millis((self.raw_delay_ms(retry_count) * jitter).min(self.max_delay_ms()));
        RetrySchedule {
            next_retry_at: clock.now() + delay,
            delay,
            estimated_delay: self.estimated_delay(retry_count),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn millis(ms: f64) -> Duration {
    Duration::milliseconds(ms.round().max(0.0) as i64)
}

/// Whether another automatic retry fits in the budget.
#[must_use]
pub fn should_retry(retry_count: i32, max_retries: i32) -> bool {
    retry_count < max_retries
}

/// Whether a retry scheduled for `next_retry_at` may run now.
#[must_use]
pub fn is_ready(next_retry_at: Option<DateTime<Utc>>, clock: &dyn Clock) -> bool {
    next_retry_at.is_none_or(|at| clock.now() >= at)
}

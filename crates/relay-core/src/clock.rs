//! Clock abstraction for determinism.

use chrono::{DateTime, SubsecRound, Utc};

/// Abstraction over system time for deterministic behavior.
///
/// Every timestamp the bus writes (`timestamp`, `acknowledged_at`,
/// `next_retry_at`, `moved_to_dlq_at`, lease expiry) comes from here.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock that delegates to the system clock.
///
/// Readings are truncated to microseconds, the resolution of a PostgreSQL
/// `TIMESTAMPTZ`, so an event compares equal to itself after a round trip
/// through the store.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }
}

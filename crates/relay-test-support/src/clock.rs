//! Test clock — deterministic `Clock` implementation for tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use relay_core::clock::Clock;

/// A clock that always returns a fixed point in time.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Returns a clock pinned `delta` after this one.
    #[must_use]
    pub fn advanced_by(self, delta: Duration) -> Self {
        Self(self.0 + delta)
    }
}

impl Default for FixedClock {
    /// 2026-01-15 10:00:00 UTC, the instant shared by the test suites.
    fn default() -> Self {
        Self(
            Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0)
                .single()
                .unwrap_or_default(),
        )
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

//! Shared application state.

use std::sync::{Arc, Mutex};

use relay_bus::domain::retry::RetryPolicy;
use relay_core::clock::Clock;
use relay_core::repository::EventStore;
use relay_core::rng::DeterministicRng;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Time source for every handler.
    pub clock: Arc<dyn Clock + Send + Sync>,
    /// Jitter source for retry scheduling.
    pub rng: Arc<Mutex<dyn DeterministicRng + Send>>,
    /// Event persistence.
    pub event_store: Arc<dyn EventStore>,
    /// Retry budget and backoff.
    pub retry_policy: RetryPolicy,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock + Send + Sync>,
        rng: Arc<Mutex<dyn DeterministicRng + Send>>,
        event_store: Arc<dyn EventStore>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            clock,
            rng,
            event_store,
            retry_policy,
        }
    }
}

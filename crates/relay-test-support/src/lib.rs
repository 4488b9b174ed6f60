//! Shared test doubles and utilities for the Relay event bus.

mod clock;
mod rng;
mod store;

pub use clock::FixedClock;
pub use rng::{MockRng, SequenceRng};
pub use store::{FailingEventStore, InMemoryEventStore, pending_event};

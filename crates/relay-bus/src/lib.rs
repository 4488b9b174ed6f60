//! Relay — the event bus proper.
//!
//! Responsible for publishing with idempotency enforcement, per-consumer
//! acknowledgment, retry scheduling and the dead-letter queue.

pub mod application;
pub mod domain;

//! Bus error types.

use thiserror::Error;
use uuid::Uuid;

use crate::event::ConsumerModule;

/// Top-level error type for every bus operation.
#[derive(Debug, Error)]
pub enum BusError {
    /// No event exists with the given identifier.
    #[error("event not found: {0}")]
    EventNotFound(Uuid),

    /// The event does not exist or is not quarantined in the dead-letter queue.
    #[error("event not found in dead-letter queue: {0}")]
    NotInDlq(Uuid),

    /// An event was already published with this idempotency key.
    #[error("an event with idempotency key '{0}' has already been published")]
    DuplicateIdempotencyKey(String),

    /// The consumer has already acknowledged this event.
    #[error("event {event_id} has already been acknowledged by {consumer_module}")]
    DuplicateAcknowledgment {
        /// The acknowledged event.
        event_id: Uuid,
        /// The consumer that acknowledged it first.
        consumer_module: ConsumerModule,
    },

    /// The event is already quarantined.
    #[error("event {0} is already in the dead-letter queue")]
    AlreadyInDlq(Uuid),

    /// Optimistic concurrency conflict.
    #[error("concurrency conflict on event {event_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The event that had the conflict.
        event_id: Uuid,
        /// The expected version.
        expected: i64,
        /// The actual version found.
        actual: i64,
    },

    /// A retry outcome was reported by a worker that does not hold the lease.
    #[error("worker '{worker_id}' does not hold a live retry claim on event {event_id}")]
    ClaimNotHeld {
        /// The event whose claim was checked.
        event_id: Uuid,
        /// The worker that reported the outcome.
        worker_id: String,
    },

    /// A validation error in caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

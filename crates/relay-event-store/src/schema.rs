//! Event store database schema.
//!
//! The tables themselves are created by the SQL migrations in
//! `migrations/`; this module holds the names the store code relies on.

/// Table holding published events.
pub const EVENTS_TABLE: &str = "bus_events";

/// Table holding per-consumer acknowledgments.
pub const ACKNOWLEDGMENTS_TABLE: &str = "bus_acknowledgments";

/// Unique constraint guarding idempotency keys.
pub const UQ_IDEMPOTENCY_KEY: &str = "uq_bus_events_idempotency_key";

/// Unique constraint guarding one acknowledgment per consumer and event.
pub const UQ_EVENT_CONSUMER: &str = "uq_bus_acknowledgments_event_consumer";

/// Column list for `bus_events` SELECT / RETURNING clauses.
pub const EVENT_COLUMNS: &str = "\
    id, topic, payload, source_module, idempotency_key, status, \
    timestamp, created_at, retry_count, max_retries, next_retry_at, \
    last_retry_at, last_error, error_history, is_dlq, moved_to_dlq_at, \
    dlq_reason, claimed_by, claim_expires_at, version";

/// Column list for `bus_acknowledgments` SELECT / RETURNING clauses.
pub const ACKNOWLEDGMENT_COLUMNS: &str = "\
    id, event_id, consumer_module, processing_status, acknowledged_at, error_message";

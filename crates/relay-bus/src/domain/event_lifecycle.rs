//! Pure state transitions of an `Event`.
//!
//! Handlers load an event, apply one of these transitions to a copy and hand
//! the result to the store together with the version they read.

use chrono::{DateTime, Utc};
use relay_core::error::BusError;
use relay_core::event::{
    Acknowledgment, ErrorRecord, Event, EventStatus, ProcessingStatus,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::commands::PublishEvent;

/// Status derived from every acknowledgment of an event, as opposed to the
/// last-write-wins `Event::status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    /// No acknowledgment yet.
    Pending,
    /// At least one acknowledgment, all successful.
    Consumed,
    /// At least one failed acknowledgment.
    Failed,
}

/// Derives the aggregate status from an event's acknowledgments.
#[must_use]
pub fn aggregate_status(acknowledgments: &[Acknowledgment]) -> AggregateStatus {
    if acknowledgments
        .iter()
        .any(|ack| ack.processing_status == ProcessingStatus::Failure)
    {
        AggregateStatus::Failed
    } else if acknowledgments.is_empty() {
        AggregateStatus::Pending
    } else {
        AggregateStatus::Consumed
    }
}

/// Builds a freshly published, pending event.
#[must_use]
pub fn new_event(command: &PublishEvent, max_retries: i32, now: DateTime<Utc>) -> Event {
    Event {
        id: Uuid::new_v4(),
        topic: command.topic,
        payload: command.payload.clone(),
        source_module: command.source_module,
        idempotency_key: command.idempotency_key.clone(),
        status: EventStatus::Pending,
        timestamp: now,
        created_at: now,
        retry_count: 0,
        max_retries,
        next_retry_at: None,
        last_retry_at: None,
        last_error: None,
        error_history: Vec::new(),
        is_dlq: false,
        moved_to_dlq_at: None,
        dlq_reason: None,
        claimed_by: None,
        claim_expires_at: None,
        version: 1,
    }
}

/// Marks the event as processed.
pub fn mark_consumed(event: &mut Event) {
    event.status = EventStatus::Consumed;
}

/// Records a processing failure: status, last error and a history entry
/// stamped with the current retry count.
pub fn record_failure(event: &mut Event, error: &str, now: DateTime<Utc>) {
    event.status = EventStatus::Failed;
    event.last_error = Some(error.to_owned());
    event.error_history.push(ErrorRecord {
        timestamp: now,
        error: error.to_owned(),
        retry_count: event.retry_count,
    });
}

/// Drops any retry lease.
pub fn release_claim(event: &mut Event) {
    event.claimed_by = None;
    event.claim_expires_at = None;
}

/// A leased retry succeeded.
pub fn retry_succeeded(event: &mut Event, now: DateTime<Utc>) {
    event.status = EventStatus::Consumed;
    event.last_retry_at = Some(now);
    event.next_retry_at = None;
    release_claim(event);
}

/// Consumes one unit of retry budget for a retry that ran at `now`.
pub fn consume_retry(event: &mut Event, now: DateTime<Utc>) {
    event.retry_count += 1;
    event.last_retry_at = Some(now);
    release_claim(event);
}

/// The DLQ reason used when retries run out.
#[must_use]
pub fn retries_exhausted_reason(max_retries: i32, error: &str) -> String {
    format!("max retries ({max_retries}) exceeded: {error}")
}

/// Quarantines the event.
///
/// # Errors
///
/// Returns `BusError::AlreadyInDlq` if the event is already quarantined.
pub fn quarantine(event: &mut Event, reason: &str, now: DateTime<Utc>) -> Result<(), BusError> {
    if event.is_dlq {
        return Err(BusError::AlreadyInDlq(event.id));
    }
    event.status = EventStatus::Failed;
    event.is_dlq = true;
    event.moved_to_dlq_at = Some(now);
    event.dlq_reason = Some(reason.to_owned());
    event.next_retry_at = None;
    release_claim(event);
    Ok(())
}

/// Returns a quarantined event to `pending` with a fresh retry budget.
/// Key, payload and error history are kept.
///
/// # Errors
///
/// Returns `BusError::NotInDlq` if the event is not quarantined.
pub fn rehabilitate(event: &mut Event) -> Result<(), BusError> {
    if !event.is_dlq {
        return Err(BusError::NotInDlq(event.id));
    }
    event.status = EventStatus::Pending;
    event.is_dlq = false;
    event.retry_count = 0;
    event.next_retry_at = None;
    event.last_retry_at = None;
    event.moved_to_dlq_at = None;
    event.dlq_reason = None;
    event.last_error = None;
    release_claim(event);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use relay_core::event::{ConsumerModule, SourceModule, Topic};
    use relay_test_support::{FixedClock, pending_event};

    fn ack(status: ProcessingStatus) -> Acknowledgment {
        Acknowledgment {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            consumer_module: ConsumerModule::Ekspedisi,
            processing_status: status,
            acknowledged_at: FixedClock::default().0,
            error_message: None,
        }
    }

    #[test]
    fn test_new_event_is_pending_with_fresh_budget() {
        // Arrange
        let now = FixedClock::default().0;
        let command = PublishEvent {
            correlation_id: Uuid::new_v4(),
            topic: Topic::PersonnelCreated,
            payload: serde_json::json!({"nip": "1987"}),
            source_module: SourceModule::Kepegawaian,
            idempotency_key: "pegawai-1987".to_owned(),
        };

        // Act
        let event = new_event(&command, 3, now);

        // Assert
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.topic, Topic::PersonnelCreated);
        assert_eq!(event.source_module, SourceModule::Kepegawaian);
        assert_eq!(event.idempotency_key, "pegawai-1987");
        assert_eq!(event.payload, serde_json::json!({"nip": "1987"}));
        assert_eq!(event.retry_count, 0);
        assert_eq!(event.max_retries, 3);
        assert_eq!(event.timestamp, now);
        assert_eq!(event.created_at, now);
        assert_eq!(event.version, 1);
        assert!(!event.is_dlq);
        assert!(event.error_history.is_empty());
    }

    #[test]
    fn test_record_failure_appends_history() {
        let now = FixedClock::default().0;
        let mut event = pending_event("k", now);
        event.retry_count = 2;

        record_failure(&mut event, "timeout", now);
        record_failure(&mut event, "still down", now + Duration::seconds(5));

        assert_eq!(event.status, EventStatus::Failed);
        assert_eq!(event.last_error.as_deref(), Some("still down"));
        assert_eq!(event.error_history.len(), 2);
        assert_eq!(event.error_history[0].error, "timeout");
        assert_eq!(event.error_history[0].retry_count, 2);
        assert_eq!(event.error_history[1].timestamp, now + Duration::seconds(5));
    }

    #[test]
    fn test_quarantine_sets_dlq_fields_and_drops_lease() {
        let now = FixedClock::default().0;
        let mut event = pending_event("k", now);
        event.next_retry_at = Some(now);
        event.claimed_by = Some("worker-1".to_owned());
        event.claim_expires_at = Some(now + Duration::seconds(60));

        quarantine(&mut event, "poison message", now).unwrap();

        assert_eq!(event.status, EventStatus::Failed);
        assert!(event.is_dlq);
        assert_eq!(event.moved_to_dlq_at, Some(now));
        assert_eq!(event.dlq_reason.as_deref(), Some("poison message"));
        assert!(event.next_retry_at.is_none());
        assert!(event.claimed_by.is_none());
        assert!(event.claim_expires_at.is_none());
    }

    #[test]
    fn test_quarantine_twice_is_rejected() {
        let now = FixedClock::default().0;
        let mut event = pending_event("k", now);
        quarantine(&mut event, "first", now).unwrap();

        let result = quarantine(&mut event, "second", now);

        assert!(matches!(result, Err(BusError::AlreadyInDlq(id)) if id == event.id));
        assert_eq!(event.dlq_reason.as_deref(), Some("first"));
    }

    #[test]
    fn test_rehabilitate_resets_state_and_keeps_identity() {
        // Arrange
        let now = FixedClock::default().0;
        let mut event = pending_event("surat-create-42", now);
        event.payload = serde_json::json!({"nomor": 42});
        event.retry_count = 5;
        event.last_retry_at = Some(now);
        record_failure(&mut event, "boom", now);
        quarantine(&mut event, "max retries (5) exceeded: boom", now).unwrap();

        // Act
        rehabilitate(&mut event).unwrap();

        // Assert
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.retry_count, 0);
        assert!(!event.is_dlq);
        assert!(event.moved_to_dlq_at.is_none());
        assert!(event.dlq_reason.is_none());
        assert!(event.last_error.is_none());
        assert!(event.last_retry_at.is_none());
        assert_eq!(event.idempotency_key, "surat-create-42");
        assert_eq!(event.payload, serde_json::json!({"nomor": 42}));
        assert_eq!(event.error_history.len(), 1);
    }

    #[test]
    fn test_rehabilitate_live_event_is_rejected() {
        let mut event = pending_event("k", FixedClock::default().0);

        let result = rehabilitate(&mut event);

        assert!(matches!(result, Err(BusError::NotInDlq(id)) if id == event.id));
    }

    #[test]
    fn test_retry_succeeded_clears_schedule_and_lease() {
        let now = FixedClock::default().0;
        let mut event = pending_event("k", now);
        record_failure(&mut event, "timeout", now);
        event.next_retry_at = Some(now);
        event.claimed_by = Some("w".to_owned());
        event.claim_expires_at = Some(now + Duration::seconds(30));

        retry_succeeded(&mut event, now);

        assert_eq!(event.status, EventStatus::Consumed);
        assert_eq!(event.last_retry_at, Some(now));
        assert!(event.next_retry_at.is_none());
        assert!(event.claimed_by.is_none());
        assert_eq!(event.retry_count, 0);
    }

    #[test]
    fn test_consume_retry_spends_budget() {
        let now = FixedClock::default().0;
        let mut event = pending_event("k", now);

        consume_retry(&mut event, now);
        consume_retry(&mut event, now);

        assert_eq!(event.retry_count, 2);
        assert_eq!(event.last_retry_at, Some(now));
    }

    #[test]
    fn test_retries_exhausted_reason() {
        assert_eq!(
            retries_exhausted_reason(5, "timeout"),
            "max retries (5) exceeded: timeout"
        );
    }

    #[test]
    fn test_aggregate_status() {
        assert_eq!(aggregate_status(&[]), AggregateStatus::Pending);
        assert_eq!(
            aggregate_status(&[ack(ProcessingStatus::Success), ack(ProcessingStatus::Success)]),
            AggregateStatus::Consumed
        );
        assert_eq!(
            aggregate_status(&[ack(ProcessingStatus::Failure), ack(ProcessingStatus::Success)]),
            AggregateStatus::Failed
        );
    }

    #[test]
    fn test_aggregate_status_serializes_snake_case() {
        let json = serde_json::to_value(AggregateStatus::Consumed).unwrap();
        assert_eq!(json, "consumed");
    }
}

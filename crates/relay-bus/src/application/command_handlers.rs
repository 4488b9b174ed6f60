//! Command handlers for publishing and acknowledging events.
//!
//! Each handler loads what it needs, applies a pure transition from
//! `domain::event_lifecycle` and persists the result with a version
//! compare-and-set.

use std::sync::Mutex;

use relay_core::clock::Clock;
use relay_core::error::BusError;
use relay_core::event::{Acknowledgment, Event, ProcessingStatus};
use relay_core::repository::EventStore;
use relay_core::rng::DeterministicRng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::commands::{AcknowledgeEvent, Command, PublishEvent};
use crate::domain::event_lifecycle;
use crate::domain::retry::{RetryPolicy, RetrySchedule, should_retry};

/// Longest accepted idempotency key, in characters.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

fn validate_idempotency_key(key: &str) -> Result<(), BusError> {
    let len = key.chars().count();
    if len == 0 || len > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(BusError::Validation(format!(
            "idempotency_key must be 1-{MAX_IDEMPOTENCY_KEY_LEN} characters, got {len}"
        )));
    }
    Ok(())
}

/// Returns the message when it carries at least one non-whitespace
/// character.
pub(crate) fn required_message<'a>(
    message: Option<&'a str>,
    what: &str,
) -> Result<&'a str, BusError> {
    message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| BusError::Validation(format!("error_message is required when {what}")))
}

/// Computes the next retry time for an event that has spent `retry_count`
/// retries.
///
/// The `Mutex` is held only for the synchronous calculation.
pub(crate) fn schedule_retry(
    policy: &RetryPolicy,
    retry_count: i32,
    clock: &dyn Clock,
    rng: &Mutex<dyn DeterministicRng + Send>,
) -> Result<RetrySchedule, BusError> {
    let mut rng_guard = rng
        .lock()
        .map_err(|e| BusError::Infrastructure(format!("RNG mutex poisoned: {e}")))?;
    Ok(policy.next_retry_time(retry_count, clock, &mut *rng_guard))
}

/// Handles the `PublishEvent` command: validates the key, rejects a
/// duplicate and stores a new pending event.
///
/// # Errors
///
/// Returns `BusError::Validation` for a key outside 1-255 characters,
/// `BusError::DuplicateIdempotencyKey` when the key is taken (including a
/// concurrent publish losing the race at the unique constraint), and
/// `BusError::Infrastructure` on storage failure.
pub async fn handle_publish(
    command: &PublishEvent,
    policy: &RetryPolicy,
    clock: &dyn Clock,
    store: &dyn EventStore,
) -> Result<Event, BusError> {
    validate_idempotency_key(&command.idempotency_key)?;

    if store
        .find_by_idempotency_key(&command.idempotency_key)
        .await?
        .is_some()
    {
        warn!(
            correlation_id = %command.correlation_id(),
            idempotency_key = %command.idempotency_key,
            "rejected duplicate publish"
        );
        return Err(BusError::DuplicateIdempotencyKey(
            command.idempotency_key.clone(),
        ));
    }

    let event = event_lifecycle::new_event(command, policy.max_retries, clock.now());
    store.insert_event(&event).await?;

    info!(
        correlation_id = %command.correlation_id(),
        command_type = command.command_type(),
        event_id = %event.id,
        topic = %event.topic,
        source_module = %event.source_module,
        "event published"
    );
    Ok(event)
}

/// Attempts an acknowledgment makes before giving up on a contended event.
pub const MAX_ACK_ATTEMPTS: usize = 5;

/// Handles the `AcknowledgeEvent` command.
///
/// Preconditions are checked in order: the event exists, the consumer has
/// not acknowledged it yet, a failure carries a non-blank message, and the
/// event is not quarantined. The acknowledgment and the event's new state
/// are then written in one transaction.
///
/// A failure schedules the next retry without spending budget; an event
/// whose budget is already spent goes to the dead-letter queue instead.
///
/// Consumers acknowledge independently, so another consumer's write may
/// bump the event version between the read and the write. The event is
/// then reloaded and the checks re-run, up to `MAX_ACK_ATTEMPTS` times.
///
/// # Errors
///
/// Returns `BusError::EventNotFound`, `BusError::DuplicateAcknowledgment`,
/// `BusError::Validation`, `BusError::AlreadyInDlq`,
/// `BusError::ConcurrencyConflict` once the attempts are exhausted, or
/// `BusError::Infrastructure`.
pub async fn handle_acknowledge(
    command: &AcknowledgeEvent,
    policy: &RetryPolicy,
    clock: &dyn Clock,
    rng: &Mutex<dyn DeterministicRng + Send>,
    store: &dyn EventStore,
) -> Result<Acknowledgment, BusError> {
    let mut attempt = 1;
    let (acknowledgment, stored) = loop {
        match try_acknowledge(command, policy, clock, rng, store).await {
            Err(BusError::ConcurrencyConflict {
                expected, actual, ..
            }) if attempt < MAX_ACK_ATTEMPTS => {
                debug!(
                    correlation_id = %command.correlation_id(),
                    event_id = %command.event_id,
                    attempt,
                    expected,
                    actual,
                    "event changed during acknowledgment, reloading"
                );
                attempt += 1;
            }
            result => break result?,
        }
    };

    info!(
        correlation_id = %command.correlation_id(),
        command_type = command.command_type(),
        event_id = %stored.id,
        consumer_module = %acknowledgment.consumer_module,
        processing_status = %acknowledgment.processing_status,
        status = %stored.status,
        attempt,
        "event acknowledged"
    );
    if stored.is_dlq {
        warn!(
            target: "dlq",
            event_id = %stored.id,
            reason = stored.dlq_reason.as_deref().unwrap_or_default(),
            "event moved to dead-letter queue"
        );
    } else if let (ProcessingStatus::Failure, Some(next_retry_at)) =
        (command.processing_status, stored.next_retry_at)
    {
        info!(event_id = %stored.id, %next_retry_at, "retry scheduled");
    }
    Ok(acknowledgment)
}

/// One read-check-write pass of `handle_acknowledge`.
async fn try_acknowledge(
    command: &AcknowledgeEvent,
    policy: &RetryPolicy,
    clock: &dyn Clock,
    rng: &Mutex<dyn DeterministicRng + Send>,
    store: &dyn EventStore,
) -> Result<(Acknowledgment, Event), BusError> {
    let event = store
        .find_event(command.event_id)
        .await?
        .ok_or(BusError::EventNotFound(command.event_id))?;

    if store
        .find_acknowledgment(command.event_id, command.consumer_module)
        .await?
        .is_some()
    {
        return Err(BusError::DuplicateAcknowledgment {
            event_id: command.event_id,
            consumer_module: command.consumer_module,
        });
    }

    let now = clock.now();
    let mut updated = event.clone();
    match command.processing_status {
        ProcessingStatus::Success => {
            if updated.is_dlq {
                return Err(BusError::AlreadyInDlq(updated.id));
            }
            event_lifecycle::mark_consumed(&mut updated);
        }
        ProcessingStatus::Failure => {
            let error = required_message(
                command.error_message.as_deref(),
                "processing_status is failure",
            )?;
            if updated.is_dlq {
                return Err(BusError::AlreadyInDlq(updated.id));
            }
            event_lifecycle::record_failure(&mut updated, error, now);
            if should_retry(updated.retry_count, updated.max_retries) {
                let schedule = schedule_retry(policy, updated.retry_count, clock, rng)?;
                updated.next_retry_at = Some(schedule.next_retry_at);
            } else {
                let reason = event_lifecycle::retries_exhausted_reason(updated.max_retries, error);
                event_lifecycle::quarantine(&mut updated, &reason, now)?;
            }
        }
    }

    let acknowledgment = Acknowledgment {
        id: Uuid::new_v4(),
        event_id: command.event_id,
        consumer_module: command.consumer_module,
        processing_status: command.processing_status,
        acknowledged_at: now,
        error_message: command.error_message.clone(),
    };
    let stored = store
        .record_acknowledgment(&acknowledgment, &updated, event.version)
        .await?;
    Ok((acknowledgment, stored))
}

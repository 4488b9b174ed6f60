//! Handlers used by retry workers: leasing due retries and reporting how
//! they went.

use std::sync::Mutex;

use relay_core::clock::Clock;
use relay_core::error::BusError;
use relay_core::event::{Event, ProcessingStatus};
use relay_core::repository::EventStore;
use relay_core::rng::DeterministicRng;
use tracing::info;

use crate::application::command_handlers::{required_message, schedule_retry};
use crate::application::dlq;
use crate::domain::commands::{ClaimRetries, Command, CompleteRetry};
use crate::domain::event_lifecycle;
use crate::domain::retry::{RetryPolicy, should_retry};

/// Batch size used when a worker does not ask for one.
pub const DEFAULT_CLAIM_LIMIT: i64 = 10;
/// Largest batch a worker may claim at once.
pub const MAX_CLAIM_LIMIT: i64 = 100;
/// Lease length used when a worker does not ask for one, in seconds.
pub const DEFAULT_LEASE_SECS: u64 = 60;
/// Longest lease a worker may hold, in seconds.
pub const MAX_LEASE_SECS: u64 = 3_600;

/// Longest accepted worker id, in characters.
const MAX_WORKER_ID_LEN: usize = 255;

fn validate_claim(command: &ClaimRetries) -> Result<chrono::Duration, BusError> {
    let worker_len = command.worker_id.chars().count();
    if command.worker_id.trim().is_empty() || worker_len > MAX_WORKER_ID_LEN {
        return Err(BusError::Validation(format!(
            "worker_id must be 1-{MAX_WORKER_ID_LEN} non-blank characters"
        )));
    }
    if !(1..=MAX_CLAIM_LIMIT).contains(&command.limit) {
        return Err(BusError::Validation(format!(
            "limit must be between 1 and {MAX_CLAIM_LIMIT}, got {}",
            command.limit
        )));
    }
    let lease_secs = command.lease.as_secs();
    if !(1..=MAX_LEASE_SECS).contains(&lease_secs) {
        return Err(BusError::Validation(format!(
            "lease must be between 1 and {MAX_LEASE_SECS} seconds, got {lease_secs}"
        )));
    }
    chrono::Duration::from_std(command.lease)
        .map_err(|e| BusError::Validation(format!("invalid lease: {e}")))
}

/// Handles the `ClaimRetries` command: leases up to `limit` due retries to
/// the worker, ordered by `next_retry_at`.
///
/// # Errors
///
/// Returns `BusError::Validation` for a blank worker id, a limit outside
/// 1-100 or a lease outside 1-3600 seconds, and `BusError::Infrastructure`
/// on storage failure.
pub async fn handle_claim_retries(
    command: &ClaimRetries,
    clock: &dyn Clock,
    store: &dyn EventStore,
) -> Result<Vec<Event>, BusError> {
    let lease = validate_claim(command)?;
    let now = clock.now();
    let claimed = store
        .claim_due_retries(&command.worker_id, now, now + lease, command.limit)
        .await?;

    info!(
        correlation_id = %command.correlation_id(),
        command_type = command.command_type(),
        worker_id = %command.worker_id,
        claimed = claimed.len(),
        "retries claimed"
    );
    Ok(claimed)
}

/// Handles the `CompleteRetry` command.
///
/// A success consumes the event. A failure spends one retry and schedules
/// the next one, or quarantines the event once the budget is spent.
///
/// # Errors
///
/// Returns `BusError::EventNotFound`, `BusError::ClaimNotHeld` when the
/// worker holds no live lease on the event, `BusError::Validation` for a
/// failure without a message, `BusError::ConcurrencyConflict` or
/// `BusError::Infrastructure`.
pub async fn handle_complete_retry(
    command: &CompleteRetry,
    policy: &RetryPolicy,
    clock: &dyn Clock,
    rng: &Mutex<dyn DeterministicRng + Send>,
    store: &dyn EventStore,
) -> Result<Event, BusError> {
    let event = store
        .find_event(command.event_id)
        .await?
        .ok_or(BusError::EventNotFound(command.event_id))?;

    let now = clock.now();
    if !event.is_claimed_by(&command.worker_id, now) {
        return Err(BusError::ClaimNotHeld {
            event_id: command.event_id,
            worker_id: command.worker_id.clone(),
        });
    }

    let mut updated = event.clone();
    let stored = match command.outcome {
        ProcessingStatus::Success => {
            event_lifecycle::retry_succeeded(&mut updated, now);
            store.update_event(&updated, event.version).await?
        }
        ProcessingStatus::Failure => {
            let error = required_message(command.error_message.as_deref(), "outcome is failure")?;
            event_lifecycle::record_failure(&mut updated, error, now);
            if should_retry(updated.retry_count, updated.max_retries) {
                event_lifecycle::consume_retry(&mut updated, now);
                let schedule = schedule_retry(policy, updated.retry_count, clock, rng)?;
                updated.next_retry_at = Some(schedule.next_retry_at);
                let stored = store.update_event(&updated, event.version).await?;
                info!(
                    event_id = %stored.id,
                    retry_count = stored.retry_count,
                    next_retry_at = %schedule.next_retry_at,
                    "retry scheduled"
                );
                stored
            } else {
                let reason = event_lifecycle::retries_exhausted_reason(updated.max_retries, error);
                dlq::move_to_dlq(&updated, &reason, clock, store).await?
            }
        }
    };

    info!(
        correlation_id = %command.correlation_id(),
        command_type = command.command_type(),
        event_id = %stored.id,
        worker_id = %command.worker_id,
        outcome = %command.outcome,
        status = %stored.status,
        "retry completed"
    );
    Ok(stored)
}

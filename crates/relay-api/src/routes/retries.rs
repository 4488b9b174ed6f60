//! Routes used by retry workers: lease due retries, then report the outcome.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use relay_bus::application::retry_handlers::{self, DEFAULT_CLAIM_LIMIT, DEFAULT_LEASE_SECS};
use relay_bus::domain::commands;
use relay_core::event::Event;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /events/retries/claim.
#[derive(Debug, Deserialize)]
pub struct ClaimRetriesRequest {
    /// Identifies the claiming worker.
    pub worker_id: String,
    /// Maximum events to lease; 10 when omitted.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Lease length in seconds; 60 when omitted.
    #[serde(default)]
    pub lease_seconds: Option<u64>,
}

/// Response body for POST /events/retries/claim.
#[derive(Debug, Serialize)]
pub struct ClaimedRetries {
    /// The leased events, earliest `next_retry_at` first.
    pub data: Vec<Event>,
}

/// Request body for POST /events/{id}/retry-outcome.
#[derive(Debug, Deserialize)]
pub struct RetryOutcomeRequest {
    /// Must match the worker holding the lease.
    pub worker_id: String,
    /// `success` or `failure`.
    pub outcome: String,
    /// Required when outcome is failure.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// POST /events/retries/claim
#[instrument(skip(state, request), fields(worker_id = %request.worker_id))]
async fn claim_retries(
    State(state): State<AppState>,
    Json(request): Json<ClaimRetriesRequest>,
) -> Result<Json<ClaimedRetries>, ApiError> {
    let command = commands::ClaimRetries {
        correlation_id: Uuid::new_v4(),
        worker_id: request.worker_id,
        limit: request.limit.unwrap_or(DEFAULT_CLAIM_LIMIT),
        lease: Duration::from_secs(request.lease_seconds.unwrap_or(DEFAULT_LEASE_SECS)),
    };

    info!(correlation_id = %command.correlation_id, "handling claim_retries command");

    let data =
        retry_handlers::handle_claim_retries(&command, state.clock.as_ref(), &*state.event_store)
            .await?;

    Ok(Json(ClaimedRetries { data }))
}

/// POST /events/{id}/retry-outcome
#[instrument(skip(state, request), fields(worker_id = %request.worker_id, outcome = %request.outcome))]
async fn retry_outcome(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<RetryOutcomeRequest>,
) -> Result<Json<Event>, ApiError> {
    let command = commands::CompleteRetry {
        correlation_id: Uuid::new_v4(),
        event_id: id,
        worker_id: request.worker_id,
        outcome: request.outcome.parse()?,
        error_message: request.error_message,
    };

    info!(correlation_id = %command.correlation_id, "handling complete_retry command");

    let event = retry_handlers::handle_complete_retry(
        &command,
        &state.retry_policy,
        state.clock.as_ref(),
        &state.rng,
        &*state.event_store,
    )
    .await?;

    Ok(Json(event))
}

/// Returns the router for retry workers.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/events/retries/claim", post(claim_retries))
        .route("/events/{id}/retry-outcome", post(retry_outcome))
}

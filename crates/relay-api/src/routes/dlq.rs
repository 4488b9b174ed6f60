//! Routes for inspecting and managing the dead-letter queue.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use relay_bus::application::dlq;
use relay_core::error::BusError;
use relay_core::event::{Event, Topic};
use relay_core::repository::DlqFilter;
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::params::{parse_enum, parse_int};
use crate::state::AppState;

/// Query string of GET /events/dlq.
#[derive(Debug, Default, Deserialize)]
pub struct ListDlqParams {
    /// Topic filter.
    pub topic: Option<String>,
    /// Source module filter.
    pub source_module: Option<String>,
    /// Page size, clamped to 1-100.
    pub limit: Option<String>,
    /// Number of events to skip.
    pub offset: Option<String>,
}

/// Query string of POST /events/dlq/retry-topic.
#[derive(Debug, Default, Deserialize)]
pub struct RetryTopicParams {
    /// The topic to rehabilitate.
    pub topic: Option<String>,
}

/// GET /events/dlq
#[instrument(skip(state, params))]
async fn list_dlq(
    State(state): State<AppState>,
    Query(params): Query<ListDlqParams>,
) -> Result<Json<dlq::DlqList>, ApiError> {
    let filter = DlqFilter {
        topic: parse_enum(params.topic.as_deref())?,
        source_module: parse_enum(params.source_module.as_deref())?,
    };
    let limit = parse_int("limit", params.limit.as_deref())?;
    let offset = parse_int("offset", params.offset.as_deref())?;

    let list = dlq::list_dlq(&filter, limit, offset, &*state.event_store).await?;
    Ok(Json(list))
}

/// GET /events/dlq/statistics
#[instrument(skip(state))]
async fn dlq_statistics(State(state): State<AppState>) -> Result<Json<dlq::DlqStats>, ApiError> {
    let stats = dlq::dlq_stats(&*state.event_store).await?;
    Ok(Json(stats))
}

/// POST /events/dlq/{id}/retry
#[instrument(skip(state))]
async fn retry_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Event>, ApiError> {
    info!(event_id = %id, "handling dlq retry");
    let event = dlq::retry_from_dlq(id, &*state.event_store).await?;
    Ok(Json(event))
}

/// POST /events/dlq/retry-topic?topic=…
#[instrument(skip(state, params), fields(topic = ?params.topic))]
async fn retry_topic(
    State(state): State<AppState>,
    Query(params): Query<RetryTopicParams>,
) -> Result<Json<dlq::BulkRetryReport>, ApiError> {
    let topic: Topic = parse_enum(params.topic.as_deref())?
        .ok_or_else(|| BusError::Validation("topic query parameter is required".to_owned()))?;

    info!(%topic, "handling dlq bulk retry");
    let report = dlq::bulk_retry_by_topic(topic, &*state.event_store).await?;
    Ok(Json(report))
}

/// DELETE /events/dlq/{id}
#[instrument(skip(state))]
async fn delete_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    info!(event_id = %id, "handling dlq purge");
    dlq::delete_from_dlq(id, &*state.event_store).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Returns the router for the dead-letter queue.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/events/dlq", get(list_dlq))
        .route("/events/dlq/statistics", get(dlq_statistics))
        .route("/events/dlq/retry-topic", post(retry_topic))
        .route("/events/dlq/{id}/retry", post(retry_event))
        .route("/events/dlq/{id}", delete(delete_event))
}

//! Routes for publishing, acknowledging and querying events.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use relay_bus::application::{command_handlers, query_handlers};
use relay_bus::domain::commands;
use relay_core::event::{Acknowledgment, Event};
use relay_core::repository::EventFilter;
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::params::{parse_enum, parse_int, parse_timestamp};
use crate::state::AppState;

/// Request body for POST /events.
#[derive(Debug, Deserialize)]
pub struct PublishEventRequest {
    /// Topic wire name, e.g. `letter.created`.
    pub topic: String,
    /// Publishing module, e.g. `SURAT`.
    pub source_module: String,
    /// Caller-supplied deduplication key.
    pub idempotency_key: String,
    /// Event payload; `{}` when omitted.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// Request body for POST /events/ack.
#[derive(Debug, Deserialize)]
pub struct AcknowledgeEventRequest {
    /// The acknowledged event.
    pub event_id: Uuid,
    /// Consuming module, e.g. `EKSPEDISI`.
    pub consumer_module: String,
    /// `success` or `failure`.
    pub processing_status: String,
    /// Required when `processing_status` is `failure`.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Query string of GET /events.
#[derive(Debug, Default, Deserialize)]
pub struct ListEventsParams {
    /// Topic filter.
    pub topic: Option<String>,
    /// Status filter.
    pub status: Option<String>,
    /// Source module filter.
    pub source_module: Option<String>,
    /// Inclusive lower bound on `timestamp`.
    pub start_date: Option<String>,
    /// Inclusive upper bound on `timestamp`.
    pub end_date: Option<String>,
    /// Exclusive lower bound on `timestamp`.
    pub since: Option<String>,
    /// One-based page number.
    pub page: Option<String>,
    /// Page size.
    pub limit: Option<String>,
}

impl TryFrom<ListEventsParams> for query_handlers::ListEvents {
    type Error = ApiError;

    fn try_from(params: ListEventsParams) -> Result<Self, Self::Error> {
        Ok(Self {
            filter: EventFilter {
                topic: parse_enum(params.topic.as_deref())?,
                status: parse_enum(params.status.as_deref())?,
                source_module: parse_enum(params.source_module.as_deref())?,
                start_date: parse_timestamp("start_date", params.start_date.as_deref())?,
                end_date: parse_timestamp("end_date", params.end_date.as_deref())?,
                since: parse_timestamp("since", params.since.as_deref())?,
            },
            page: parse_int("page", params.page.as_deref())?,
            limit: parse_int("limit", params.limit.as_deref())?,
        })
    }
}

/// POST /events
#[instrument(skip(state, request), fields(topic = %request.topic, idempotency_key = %request.idempotency_key))]
async fn publish_event(
    State(state): State<AppState>,
    Json(request): Json<PublishEventRequest>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let command = commands::PublishEvent {
        correlation_id: Uuid::new_v4(),
        topic: request.topic.parse()?,
        source_module: request.source_module.parse()?,
        idempotency_key: request.idempotency_key,
        payload: request
            .payload
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
    };

    info!(correlation_id = %command.correlation_id, "handling publish_event command");

    let event = command_handlers::handle_publish(
        &command,
        &state.retry_policy,
        state.clock.as_ref(),
        &*state.event_store,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(event)))
}

/// POST /events/ack
#[instrument(skip(state, request), fields(event_id = %request.event_id, consumer_module = %request.consumer_module))]
async fn acknowledge_event(
    State(state): State<AppState>,
    Json(request): Json<AcknowledgeEventRequest>,
) -> Result<(StatusCode, Json<Acknowledgment>), ApiError> {
    let command = commands::AcknowledgeEvent {
        correlation_id: Uuid::new_v4(),
        event_id: request.event_id,
        consumer_module: request.consumer_module.parse()?,
        processing_status: request.processing_status.parse()?,
        error_message: request.error_message,
    };

    info!(correlation_id = %command.correlation_id, "handling acknowledge_event command");

    let acknowledgment = command_handlers::handle_acknowledge(
        &command,
        &state.retry_policy,
        state.clock.as_ref(),
        &state.rng,
        &*state.event_store,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(acknowledgment)))
}

/// GET /events
#[instrument(skip(state, params))]
async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<ListEventsParams>,
) -> Result<Json<query_handlers::EventList>, ApiError> {
    let query = query_handlers::ListEvents::try_from(params)?;
    let list = query_handlers::list_events(&query, &*state.event_store).await?;
    Ok(Json(list))
}

/// GET /events/stats
#[instrument(skip(state))]
async fn event_stats(
    State(state): State<AppState>,
) -> Result<Json<query_handlers::EventStats>, ApiError> {
    let stats = query_handlers::event_stats(&*state.event_store).await?;
    Ok(Json(stats))
}

/// GET /events/pending
#[instrument(skip(state))]
async fn pending_events(State(state): State<AppState>) -> Result<Json<Vec<Event>>, ApiError> {
    let events = query_handlers::pending_events(&*state.event_store).await?;
    Ok(Json(events))
}

/// GET /events/{id}
#[instrument(skip(state))]
async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<query_handlers::EventDetail>, ApiError> {
    let detail = query_handlers::get_event(id, state.clock.as_ref(), &*state.event_store).await?;
    Ok(Json(detail))
}

/// Returns the router for publishing, acknowledgment and event queries.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/events", post(publish_event).get(list_events))
        .route("/events/ack", post(acknowledge_event))
        .route("/events/stats", get(event_stats))
        .route("/events/pending", get(pending_events))
        .route("/events/{id}", get(get_event))
}

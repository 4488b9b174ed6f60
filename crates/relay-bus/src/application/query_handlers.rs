//! Query handlers: event listing, statistics, the pending backlog and the
//! event detail view.

use relay_core::clock::Clock;
use relay_core::error::BusError;
use relay_core::event::{Acknowledgment, Event, EventStatus};
use relay_core::repository::{EventFilter, EventStore, PageRequest};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::event_lifecycle::{AggregateStatus, aggregate_status};
use crate::domain::retry::is_ready;

/// Page used when the caller does not ask for one.
pub const DEFAULT_PAGE: i64 = 1;
/// Page size used when the caller does not ask for one.
pub const DEFAULT_LIMIT: i64 = 20;
/// Largest accepted page size.
pub const MAX_LIMIT: i64 = 100;

/// Parameters of the event listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListEvents {
    /// Which events to include.
    pub filter: EventFilter,
    /// One-based page number.
    pub page: Option<i64>,
    /// Page size.
    pub limit: Option<i64>,
}

/// Pagination metadata for the event listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    /// The returned page.
    pub page: i64,
    /// The page size.
    pub limit: i64,
    /// Events matching the filter across all pages.
    pub total: i64,
    /// `ceil(total / limit)`.
    pub total_pages: i64,
}

/// One page of events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventList {
    /// The events, newest first.
    pub data: Vec<Event>,
    /// Pagination metadata.
    pub meta: PageMeta,
}

/// Event counts per status and the share of consumed events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventStats {
    /// All events.
    pub total: i64,
    /// Pending events.
    pub pending: i64,
    /// Consumed events.
    pub consumed: i64,
    /// Failed events.
    pub failed: i64,
    /// `consumed / total` as a percentage with two decimals, or `"0%"`.
    pub success_rate: String,
}

/// An event together with its acknowledgments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventDetail {
    /// The event.
    #[serde(flatten)]
    pub event: Event,
    /// Every acknowledgment, oldest first.
    pub acknowledgments: Vec<Acknowledgment>,
    /// Status derived from all acknowledgments.
    pub aggregate_status: AggregateStatus,
    /// Whether the event is waiting on a retry that may run now.
    pub retry_due: bool,
}

/// Lists events matching the filter, newest first.
///
/// # Errors
///
/// Returns `BusError::Validation` when `page < 1` or `limit` is outside
/// 1-100, and `BusError::Infrastructure` on storage failure.
pub async fn list_events(
    query: &ListEvents,
    store: &dyn EventStore,
) -> Result<EventList, BusError> {
    let page = query.page.unwrap_or(DEFAULT_PAGE);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if page < 1 {
        return Err(BusError::Validation(format!(
            "page must be at least 1, got {page}"
        )));
    }
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(BusError::Validation(format!(
            "limit must be between 1 and {MAX_LIMIT}, got {limit}"
        )));
    }
    if query
        .filter
        .start_date
        .zip(query.filter.end_date)
        .is_some_and(|(start, end)| start > end)
    {
        return Err(BusError::Validation(
            "start_date must not be after end_date".to_owned(),
        ));
    }

    let offset = (page - 1).saturating_mul(limit);
    let result = store
        .list_events(&query.filter, PageRequest { limit, offset })
        .await?;

    Ok(EventList {
        data: result.items,
        meta: PageMeta {
            page,
            limit,
            total: result.total,
            total_pages: (result.total + limit - 1) / limit,
        },
    })
}

/// Formats `consumed / total` as a percentage.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn success_rate(consumed: i64, total: i64) -> String {
    if total == 0 {
        return "0%".to_owned();
    }
    format!("{:.2}%", consumed as f64 / total as f64 * 100.0)
}

/// Counts events per status.
///
/// # Errors
///
/// Returns `BusError::Infrastructure` on storage failure.
pub async fn event_stats(store: &dyn EventStore) -> Result<EventStats, BusError> {
    let counts = store.count_by_status().await?;
    Ok(EventStats {
        total: counts.total,
        pending: counts.pending,
        consumed: counts.consumed,
        failed: counts.failed,
        success_rate: success_rate(counts.consumed, counts.total),
    })
}

/// Lists pending events, oldest first.
///
/// # Errors
///
/// Returns `BusError::Infrastructure` on storage failure.
pub async fn pending_events(store: &dyn EventStore) -> Result<Vec<Event>, BusError> {
    store.pending_events().await
}

/// Loads one event with its acknowledgments.
///
/// # Errors
///
/// Returns `BusError::EventNotFound` if no event has this id, and
/// `BusError::Infrastructure` on storage failure.
pub async fn get_event(
    event_id: Uuid,
    clock: &dyn Clock,
    store: &dyn EventStore,
) -> Result<EventDetail, BusError> {
    let event = store
        .find_event(event_id)
        .await?
        .ok_or(BusError::EventNotFound(event_id))?;
    let acknowledgments = store.list_acknowledgments(event_id).await?;

    let retry_due = event.status == EventStatus::Failed
        && !event.is_dlq
        && event.next_retry_at.is_some()
        && is_ready(event.next_retry_at, clock);

    Ok(EventDetail {
        aggregate_status: aggregate_status(&acknowledgments),
        retry_due,
        acknowledgments,
        event,
    })
}

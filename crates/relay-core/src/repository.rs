//! Event store abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::BusError;
use crate::event::{Acknowledgment, ConsumerModule, Event, EventStatus, SourceModule, Topic};

/// Filters for the general event listing. Unset fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    /// Only events of this topic.
    pub topic: Option<Topic>,
    /// Only events in this lifecycle state.
    pub status: Option<EventStatus>,
    /// Only events published by this module.
    pub source_module: Option<SourceModule>,
    /// Events with `timestamp >= start_date`.
    pub start_date: Option<DateTime<Utc>>,
    /// Events with `timestamp <= end_date`.
    pub end_date: Option<DateTime<Utc>>,
    /// Events with `timestamp > since`.
    pub since: Option<DateTime<Utc>>,
}

impl EventFilter {
    /// Returns `true` when `event` satisfies every set criterion.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        self.topic.is_none_or(|topic| event.topic == topic)
            && self.status.is_none_or(|status| event.status == status)
            && self
                .source_module
                .is_none_or(|module| event.source_module == module)
            && self.start_date.is_none_or(|start| event.timestamp >= start)
            && self.end_date.is_none_or(|end| event.timestamp <= end)
            && self.since.is_none_or(|since| event.timestamp > since)
    }
}

/// Filters for the dead-letter queue listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DlqFilter {
    /// Only quarantined events of this topic.
    pub topic: Option<Topic>,
    /// Only quarantined events published by this module.
    pub source_module: Option<SourceModule>,
}

impl DlqFilter {
    /// Returns `true` when `event` is quarantined and satisfies the filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        event.is_dlq
            && self.topic.is_none_or(|topic| event.topic == topic)
            && self
                .source_module
                .is_none_or(|module| event.source_module == module)
    }
}

/// A window into an ordered result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum number of items to return.
    pub limit: i64,
    /// Number of items to skip.
    pub offset: i64,
}

/// A page of results plus the size of the full, unpaginated set.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// The items in this window.
    pub items: Vec<T>,
    /// Number of items matching the query across all pages.
    pub total: i64,
}

/// Event counts per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    /// All stored events.
    pub total: i64,
    /// Events in `pending`.
    pub pending: i64,
    /// Events in `consumed`.
    pub consumed: i64,
    /// Events in `failed` (including quarantined ones).
    pub failed: i64,
}

/// Durable storage for events and their acknowledgments.
///
/// Every mutation of an existing event is a compare-and-set on
/// [`Event::version`]: the caller passes the version it read, the store
/// writes `expected_version + 1` and returns the stored event, or fails
/// with [`BusError::ConcurrencyConflict`] if another writer got there first.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a freshly published event.
    ///
    /// Fails with [`BusError::DuplicateIdempotencyKey`] when the key is taken.
    async fn insert_event(&self, event: &Event) -> Result<(), BusError>;

    /// Load one event by id.
    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, BusError>;

    /// Load one event by idempotency key.
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Event>, BusError>;

    /// Persist every mutable field of `event`.
    async fn update_event(&self, event: &Event, expected_version: i64) -> Result<Event, BusError>;

    /// Insert `acknowledgment` and persist `event` in one transaction.
    ///
    /// Fails with [`BusError::DuplicateAcknowledgment`] when the consumer has
    /// already acknowledged the event; nothing is written in that case.
    async fn record_acknowledgment(
        &self,
        acknowledgment: &Acknowledgment,
        event: &Event,
        expected_version: i64,
    ) -> Result<Event, BusError>;

    /// Load the acknowledgment a consumer recorded for an event, if any.
    async fn find_acknowledgment(
        &self,
        event_id: Uuid,
        consumer_module: ConsumerModule,
    ) -> Result<Option<Acknowledgment>, BusError>;

    /// Load every acknowledgment of an event, oldest first.
    async fn list_acknowledgments(&self, event_id: Uuid) -> Result<Vec<Acknowledgment>, BusError>;

    /// Delete a quarantined event and its acknowledgments.
    ///
    /// Returns `false` when no quarantined event has this id.
    async fn delete_dlq_event(&self, id: Uuid) -> Result<bool, BusError>;

    /// List events matching `filter`, newest `timestamp` first.
    async fn list_events(
        &self,
        filter: &EventFilter,
        page: PageRequest,
    ) -> Result<Page<Event>, BusError>;

    /// Count events per lifecycle state.
    async fn count_by_status(&self) -> Result<StatusCounts, BusError>;

    /// All pending events, oldest `timestamp` first.
    async fn pending_events(&self) -> Result<Vec<Event>, BusError>;

    /// List quarantined events, most recently quarantined first.
    async fn list_dlq(&self, filter: &DlqFilter, page: PageRequest)
    -> Result<Page<Event>, BusError>;

    /// All quarantined events of one topic, oldest quarantine first.
    async fn dlq_events_by_topic(&self, topic: Topic) -> Result<Vec<Event>, BusError>;

    /// Lease up to `limit` failed, non-quarantined events whose retry is due
    /// at `now` and which no live lease covers. Claimed events get
    /// `claimed_by = worker_id` and `claim_expires_at = lease_until`.
    async fn claim_due_retries(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Event>, BusError>;
}

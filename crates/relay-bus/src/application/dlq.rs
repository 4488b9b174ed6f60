//! Dead-letter queue management: quarantine, inspection, rehabilitation
//! and purge.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use relay_core::clock::Clock;
use relay_core::error::BusError;
use relay_core::event::{Event, Topic};
use relay_core::repository::{DlqFilter, EventStore, PageRequest};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::event_lifecycle;

/// Page size of the DLQ listing when the caller does not ask for one.
pub const DEFAULT_DLQ_LIMIT: i64 = 50;
/// Largest DLQ page size; larger requests are clamped.
pub const MAX_DLQ_LIMIT: i64 = 100;
/// How many recently quarantined events the statistics look at.
pub const STATS_WINDOW: i64 = 100;
/// How many entries `recent_failures` lists.
pub const RECENT_FAILURES: usize = 10;

/// One page of quarantined events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DlqList {
    /// Quarantined events, most recently quarantined first.
    pub data: Vec<Event>,
    /// Quarantined events matching the filter across all pages.
    pub total: i64,
    /// The effective page size.
    pub limit: i64,
    /// The effective offset.
    pub offset: i64,
}

/// A recently quarantined event, summarised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DlqFailure {
    /// The event.
    pub id: Uuid,
    /// Its topic.
    pub topic: Topic,
    /// Its last error, or `"Unknown error"`.
    pub error: String,
    /// When it was quarantined.
    pub moved_at: Option<DateTime<Utc>>,
}

/// DLQ statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DlqStats {
    /// Every quarantined event.
    pub total: i64,
    /// Counts per topic over the statistics window.
    pub by_topic: BTreeMap<&'static str, i64>,
    /// Counts per source module over the statistics window.
    pub by_source_module: BTreeMap<&'static str, i64>,
    /// The most recently quarantined events.
    pub recent_failures: Vec<DlqFailure>,
}

/// A DLQ event that could not be rehabilitated during a bulk retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkRetryFailure {
    /// The event.
    pub id: Uuid,
    /// Why rehabilitation failed.
    pub error: String,
}

/// Outcome of a bulk retry. Every processed id appears in exactly one of
/// `succeeded` and `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkRetryReport {
    /// The topic that was retried.
    pub topic: Topic,
    /// Number of quarantined events found for the topic.
    pub processed: usize,
    /// Events returned to `pending`.
    pub succeeded: Vec<Uuid>,
    /// Events left in the queue.
    pub failed: Vec<BulkRetryFailure>,
}

/// Quarantines `event`, persisting against the version it was read at.
///
/// # Errors
///
/// Returns `BusError::AlreadyInDlq` if the event is already quarantined,
/// `BusError::ConcurrencyConflict` if it changed since it was read, and
/// `BusError::Infrastructure` on storage failure.
pub async fn move_to_dlq(
    event: &Event,
    reason: &str,
    clock: &dyn Clock,
    store: &dyn EventStore,
) -> Result<Event, BusError> {
    let mut quarantined = event.clone();
    event_lifecycle::quarantine(&mut quarantined, reason, clock.now())?;
    let stored = store.update_event(&quarantined, event.version).await?;

    warn!(
        target: "dlq",
        event_id = %stored.id,
        topic = %stored.topic,
        retry_count = stored.retry_count,
        reason,
        "event moved to dead-letter queue"
    );
    Ok(stored)
}

/// Lists quarantined events. `limit` defaults to 50 and is clamped to
/// 1-100; a negative `offset` counts as 0.
///
/// # Errors
///
/// Returns `BusError::Infrastructure` on storage failure.
pub async fn list_dlq(
    filter: &DlqFilter,
    limit: Option<i64>,
    offset: Option<i64>,
    store: &dyn EventStore,
) -> Result<DlqList, BusError> {
    let limit = limit.unwrap_or(DEFAULT_DLQ_LIMIT).clamp(1, MAX_DLQ_LIMIT);
    let offset = offset.unwrap_or(0).max(0);
    let page = store.list_dlq(filter, PageRequest { limit, offset }).await?;
    Ok(DlqList {
        data: page.items,
        total: page.total,
        limit,
        offset,
    })
}

/// Summarises the dead-letter queue.
///
/// # Errors
///
/// Returns `BusError::Infrastructure` on storage failure.
pub async fn dlq_stats(store: &dyn EventStore) -> Result<DlqStats, BusError> {
    let window = store
        .list_dlq(
            &DlqFilter::default(),
            PageRequest {
                limit: STATS_WINDOW,
                offset: 0,
            },
        )
        .await?;

    let mut by_topic = BTreeMap::new();
    let mut by_source_module = BTreeMap::new();
    for event in &window.items {
        *by_topic.entry(event.topic.as_str()).or_insert(0) += 1;
        *by_source_module
            .entry(event.source_module.as_str())
            .or_insert(0) += 1;
    }

    let recent_failures = window
        .items
        .iter()
        .take(RECENT_FAILURES)
        .map(|event| DlqFailure {
            id: event.id,
            topic: event.topic,
            error: event
                .last_error
                .clone()
                .unwrap_or_else(|| "Unknown error".to_owned()),
            moved_at: event.moved_to_dlq_at,
        })
        .collect();

    Ok(DlqStats {
        total: window.total,
        by_topic,
        by_source_module,
        recent_failures,
    })
}

/// Returns a quarantined event to `pending` with a fresh retry budget.
///
/// # Errors
///
/// Returns `BusError::NotInDlq` if the event is missing or not quarantined,
/// `BusError::ConcurrencyConflict` if it changed concurrently, and
/// `BusError::Infrastructure` on storage failure.
pub async fn retry_from_dlq(event_id: Uuid, store: &dyn EventStore) -> Result<Event, BusError> {
    let event = store
        .find_event(event_id)
        .await?
        .filter(|event| event.is_dlq)
        .ok_or(BusError::NotInDlq(event_id))?;

    let mut rehabilitated = event.clone();
    event_lifecycle::rehabilitate(&mut rehabilitated)?;
    let stored = store.update_event(&rehabilitated, event.version).await?;

    info!(target: "dlq", event_id = %stored.id, topic = %stored.topic, "event retried from dead-letter queue");
    Ok(stored)
}

/// Permanently deletes a quarantined event and its acknowledgments.
///
/// # Errors
///
/// Returns `BusError::NotInDlq` if no quarantined event has this id, and
/// `BusError::Infrastructure` on storage failure.
pub async fn delete_from_dlq(event_id: Uuid, store: &dyn EventStore) -> Result<(), BusError> {
    if !store.delete_dlq_event(event_id).await? {
        return Err(BusError::NotInDlq(event_id));
    }
    info!(target: "dlq", event_id = %event_id, "event purged from dead-letter queue");
    Ok(())
}

/// Rehabilitates every quarantined event of `topic`, one at a time.
/// Events that fail to rehabilitate stay quarantined and are listed in the
/// report.
///
/// # Errors
///
/// Returns `BusError::Infrastructure` if the quarantined events cannot be
/// loaded. Per-event failures are reported, not returned.
pub async fn bulk_retry_by_topic(
    topic: Topic,
    store: &dyn EventStore,
) -> Result<BulkRetryReport, BusError> {
    let events = store.dlq_events_by_topic(topic).await?;
    let mut report = BulkRetryReport {
        topic,
        processed: events.len(),
        succeeded: Vec::with_capacity(events.len()),
        failed: Vec::new(),
    };

    for event in events {
        match retry_from_dlq(event.id, store).await {
            Ok(_) => report.succeeded.push(event.id),
            Err(e) => {
                warn!(target: "dlq", event_id = %event.id, error = %e, "bulk retry skipped event");
                report.failed.push(BulkRetryFailure {
                    id: event.id,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        target: "dlq",
        topic = %topic,
        processed = report.processed,
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        "bulk retry finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use relay_core::event::{
        Acknowledgment, ConsumerModule, EventStatus, ProcessingStatus, SourceModule,
    };
    use relay_core::repository::{EventFilter, Page, StatusCounts};
    use relay_test_support::{FailingEventStore, FixedClock, InMemoryEventStore, pending_event};

    use super::*;

    fn quarantined(key: &str, topic: Topic, moved_minutes: i64) -> Event {
        let clock = FixedClock::default();
        let mut event = pending_event(key, clock.0);
        event.topic = topic;
        event.retry_count = 5;
        event.last_error = Some(format!("{key} failed"));
        event_lifecycle::quarantine(
            &mut event,
            "max retries (5) exceeded",
            clock.0 + Duration::minutes(moved_minutes),
        )
        .unwrap();
        event
    }

    #[tokio::test]
    async fn test_move_to_dlq_persists_quarantine() {
        // Arrange
        let clock = FixedClock::default();
        let event = pending_event("k", clock.0);
        let store = InMemoryEventStore::with_events(vec![event.clone()]);

        // Act
        let stored = move_to_dlq(&event, "poison message", &clock, &store)
            .await
            .unwrap();

        // Assert
        assert!(stored.is_dlq);
        assert_eq!(stored.status, EventStatus::Failed);
        assert_eq!(stored.moved_to_dlq_at, Some(clock.0));
        assert_eq!(stored.dlq_reason.as_deref(), Some("poison message"));
        assert_eq!(stored.version, 2);
        assert_eq!(store.events(), vec![stored]);
    }

    #[tokio::test]
    async fn test_move_to_dlq_twice_is_rejected() {
        let clock = FixedClock::default();
        let event = quarantined("k", Topic::LetterCreated, 0);
        let store = InMemoryEventStore::with_events(vec![event.clone()]);

        let result = move_to_dlq(&event, "again", &clock, &store).await;

        assert!(matches!(result, Err(BusError::AlreadyInDlq(id)) if id == event.id));
    }

    #[tokio::test]
    async fn test_move_to_dlq_with_stale_version_conflicts() {
        let clock = FixedClock::default();
        let event = pending_event("k", clock.0);
        let store = InMemoryEventStore::with_events(vec![event.clone()]);
        let mut newer = event.clone();
        newer.status = EventStatus::Consumed;
        store.update_event(&newer, 1).await.unwrap();

        let result = move_to_dlq(&event, "late", &clock, &store).await;

        assert!(matches!(
            result,
            Err(BusError::ConcurrencyConflict {
                expected: 1,
                actual: 2,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_list_dlq_clamps_limit_and_orders_newest_first() {
        // Arrange
        let mut events: Vec<Event> = (0..3)
            .map(|i| quarantined(&format!("dlq-{i}"), Topic::LetterCreated, i))
            .collect();
        events.push(pending_event("live", FixedClock::default().0));
        let store = InMemoryEventStore::with_events(events);

        // Act
        let oversized = list_dlq(&DlqFilter::default(), Some(500), Some(-3), &store)
            .await
            .unwrap();
        let defaulted = list_dlq(&DlqFilter::default(), None, None, &store)
            .await
            .unwrap();
        let tiny = list_dlq(&DlqFilter::default(), Some(0), Some(1), &store)
            .await
            .unwrap();

        // Assert
        assert_eq!(oversized.limit, 100);
        assert_eq!(oversized.offset, 0);
        let keys: Vec<&str> = oversized
            .data
            .iter()
            .map(|e| e.idempotency_key.as_str())
            .collect();
        assert_eq!(keys, vec!["dlq-2", "dlq-1", "dlq-0"]);
        assert_eq!(defaulted.limit, 50);
        assert_eq!(defaulted.total, 3);
        assert_eq!(tiny.limit, 1);
        assert_eq!(tiny.data.len(), 1);
        assert_eq!(tiny.data[0].idempotency_key, "dlq-1");
        assert_eq!(tiny.total, 3);
    }

    #[tokio::test]
    async fn test_list_dlq_filters_by_topic() {
        let store = InMemoryEventStore::with_events(vec![
            quarantined("a", Topic::LetterCreated, 0),
            quarantined("b", Topic::ShipmentDelivered, 1),
        ]);
        let filter = DlqFilter {
            topic: Some(Topic::ShipmentDelivered),
            source_module: None,
        };

        let list = list_dlq(&filter, None, None, &store).await.unwrap();

        assert_eq!(list.total, 1);
        assert_eq!(list.data[0].idempotency_key, "b");
    }

    #[tokio::test]
    async fn test_dlq_stats_groups_and_summarises() {
        // Arrange
        let mut unknown = quarantined("no-error", Topic::ShipmentCreated, 20);
        unknown.last_error = None;
        unknown.source_module = SourceModule::Ekspedisi;
        let mut events: Vec<Event> = (0..12)
            .map(|i| quarantined(&format!("letter-{i}"), Topic::LetterUpdated, i))
            .collect();
        events.push(unknown.clone());
        events.push(pending_event("live", FixedClock::default().0));
        let store = InMemoryEventStore::with_events(events);

        // Act
        let stats = dlq_stats(&store).await.unwrap();

        // Assert
        assert_eq!(stats.total, 13);
        assert_eq!(stats.by_topic.get("letter.updated"), Some(&12));
        assert_eq!(stats.by_topic.get("shipment.created"), Some(&1));
        assert_eq!(stats.by_source_module.get("SURAT"), Some(&12));
        assert_eq!(stats.by_source_module.get("EKSPEDISI"), Some(&1));
        assert_eq!(stats.recent_failures.len(), 10);
        assert_eq!(stats.recent_failures[0].id, unknown.id);
        assert_eq!(stats.recent_failures[0].error, "Unknown error");
        assert_eq!(stats.recent_failures[1].error, "letter-11 failed");
    }

    #[tokio::test]
    async fn test_dlq_stats_empty_queue() {
        let stats = dlq_stats(&InMemoryEventStore::new()).await.unwrap();

        assert_eq!(stats.total, 0);
        assert!(stats.by_topic.is_empty());
        assert!(stats.recent_failures.is_empty());
    }

    #[tokio::test]
    async fn test_retry_from_dlq_resets_event() {
        // Arrange
        let mut event = quarantined("surat-create-42", Topic::LetterCreated, 0);
        event.payload = serde_json::json!({"nomor": 42});
        let store = InMemoryEventStore::with_events(vec![event.clone()]);

        // Act
        let stored = retry_from_dlq(event.id, &store).await.unwrap();

        // Assert
        assert_eq!(stored.status, EventStatus::Pending);
        assert_eq!(stored.retry_count, 0);
        assert!(!stored.is_dlq);
        assert!(stored.dlq_reason.is_none());
        assert_eq!(stored.idempotency_key, "surat-create-42");
        assert_eq!(stored.payload, serde_json::json!({"nomor": 42}));
    }

    #[tokio::test]
    async fn test_retry_from_dlq_rejects_live_and_missing_events() {
        let live = pending_event("live", FixedClock::default().0);
        let store = InMemoryEventStore::with_events(vec![live.clone()]);
        let missing = Uuid::new_v4();

        let live_result = retry_from_dlq(live.id, &store).await;
        let missing_result = retry_from_dlq(missing, &store).await;

        assert!(matches!(live_result, Err(BusError::NotInDlq(id)) if id == live.id));
        assert!(matches!(missing_result, Err(BusError::NotInDlq(id)) if id == missing));
    }

    #[tokio::test]
    async fn test_delete_from_dlq_removes_event_and_acknowledgments() {
        // Arrange
        let clock = FixedClock::default();
        let event = pending_event("k", clock.0);
        let store = InMemoryEventStore::with_events(vec![event.clone()]);
        let mut failed = event.clone();
        event_lifecycle::record_failure(&mut failed, "boom", clock.0);
        event_lifecycle::quarantine(&mut failed, "boom", clock.0).unwrap();
        let ack = Acknowledgment {
            id: Uuid::new_v4(),
            event_id: event.id,
            consumer_module: ConsumerModule::Surat,
            processing_status: ProcessingStatus::Failure,
            acknowledged_at: clock.0,
            error_message: Some("boom".to_owned()),
        };
        store.record_acknowledgment(&ack, &failed, 1).await.unwrap();

        // Act
        delete_from_dlq(event.id, &store).await.unwrap();

        // Assert
        assert!(store.events().is_empty());
        assert!(store.acknowledgments().is_empty());
    }

    #[tokio::test]
    async fn test_delete_from_dlq_rejects_live_event() {
        let live = pending_event("live", FixedClock::default().0);
        let store = InMemoryEventStore::with_events(vec![live.clone()]);

        let result = delete_from_dlq(live.id, &store).await;

        assert!(matches!(result, Err(BusError::NotInDlq(_))));
        assert_eq!(store.events().len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_retry_rehabilitates_only_the_topic() {
        // Arrange
        let store = InMemoryEventStore::with_events(vec![
            quarantined("a", Topic::ShipmentStatusChanged, 0),
            quarantined("b", Topic::ShipmentStatusChanged, 1),
            quarantined("c", Topic::LetterDeleted, 2),
        ]);

        // Act
        let report = bulk_retry_by_topic(Topic::ShipmentStatusChanged, &store)
            .await
            .unwrap();

        // Assert
        assert_eq!(report.topic, Topic::ShipmentStatusChanged);
        assert_eq!(report.processed, 2);
        assert_eq!(report.succeeded.len(), 2);
        assert!(report.failed.is_empty());
        let still_quarantined: Vec<String> = store
            .events()
            .into_iter()
            .filter(|e| e.is_dlq)
            .map(|e| e.idempotency_key)
            .collect();
        assert_eq!(still_quarantined, vec!["c".to_owned()]);
    }

    /// Delegates to an in-memory store but fails every update of one event.
    struct FlakyStore {
        inner: InMemoryEventStore,
        broken: Uuid,
    }

    #[async_trait]
    impl EventStore for FlakyStore {
        async fn insert_event(&self, event: &Event) -> Result<(), BusError> {
            self.inner.insert_event(event).await
        }
        async fn find_event(&self, id: Uuid) -> Result<Option<Event>, BusError> {
            self.inner.find_event(id).await
        }
        async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Event>, BusError> {
            self.inner.find_by_idempotency_key(key).await
        }
        async fn update_event(&self, event: &Event, expected_version: i64) -> Result<Event, BusError> {
            if event.id == self.broken {
                return Err(BusError::Infrastructure("connection reset".to_owned()));
            }
            self.inner.update_event(event, expected_version).await
        }
        async fn record_acknowledgment(
            &self,
            acknowledgment: &Acknowledgment,
            event: &Event,
            expected_version: i64,
        ) -> Result<Event, BusError> {
            self.inner
                .record_acknowledgment(acknowledgment, event, expected_version)
                .await
        }
        async fn find_acknowledgment(
            &self,
            event_id: Uuid,
            consumer_module: ConsumerModule,
        ) -> Result<Option<Acknowledgment>, BusError> {
            self.inner.find_acknowledgment(event_id, consumer_module).await
        }
        async fn list_acknowledgments(&self, event_id: Uuid) -> Result<Vec<Acknowledgment>, BusError> {
            self.inner.list_acknowledgments(event_id).await
        }
        async fn delete_dlq_event(&self, id: Uuid) -> Result<bool, BusError> {
            self.inner.delete_dlq_event(id).await
        }
        async fn list_events(
            &self,
            filter: &EventFilter,
            page: PageRequest,
        ) -> Result<Page<Event>, BusError> {
            self.inner.list_events(filter, page).await
        }
        async fn count_by_status(&self) -> Result<StatusCounts, BusError> {
            self.inner.count_by_status().await
        }
        async fn pending_events(&self) -> Result<Vec<Event>, BusError> {
            self.inner.pending_events().await
        }
        async fn list_dlq(
            &self,
            filter: &DlqFilter,
            page: PageRequest,
        ) -> Result<Page<Event>, BusError> {
            self.inner.list_dlq(filter, page).await
        }
        async fn dlq_events_by_topic(&self, topic: Topic) -> Result<Vec<Event>, BusError> {
            self.inner.dlq_events_by_topic(topic).await
        }
        async fn claim_due_retries(
            &self,
            worker_id: &str,
            now: DateTime<Utc>,
            lease_until: DateTime<Utc>,
            limit: i64,
        ) -> Result<Vec<Event>, BusError> {
            self.inner
                .claim_due_retries(worker_id, now, lease_until, limit)
                .await
        }
    }

    #[tokio::test]
    async fn test_bulk_retry_reports_partial_failure() {
        // Arrange
        let ok = quarantined("ok", Topic::PersonnelDeleted, 0);
        let broken = quarantined("broken", Topic::PersonnelDeleted, 1);
        let store = FlakyStore {
            inner: InMemoryEventStore::with_events(vec![ok.clone(), broken.clone()]),
            broken: broken.id,
        };

        // Act
        let report = bulk_retry_by_topic(Topic::PersonnelDeleted, &store)
            .await
            .unwrap();

        // Assert
        assert_eq!(report.processed, 2);
        assert_eq!(report.succeeded, vec![ok.id]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, broken.id);
        assert!(report.failed[0].error.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_bulk_retry_with_empty_topic() {
        let report = bulk_retry_by_topic(Topic::LetterCreated, &InMemoryEventStore::new())
            .await
            .unwrap();

        assert_eq!(report.processed, 0);
        assert!(report.succeeded.is_empty());
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_retry_propagates_load_failure() {
        let result = bulk_retry_by_topic(Topic::LetterCreated, &FailingEventStore).await;

        assert!(matches!(result, Err(BusError::Infrastructure(_))));
    }
}

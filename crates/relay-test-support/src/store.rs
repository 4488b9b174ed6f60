//! Test stores — `EventStore` implementations for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::error::BusError;
use relay_core::event::{
    Acknowledgment, ConsumerModule, Event, EventStatus, SourceModule, Topic,
};
use relay_core::repository::{
    DlqFilter, EventFilter, EventStore, Page, PageRequest, StatusCounts,
};
use uuid::Uuid;

/// Builds a freshly published `letter.created` event from `SURAT` with the
/// given idempotency key and timestamp.
#[must_use]
pub fn pending_event(idempotency_key: &str, timestamp: DateTime<Utc>) -> Event {
    Event {
        id: Uuid::new_v4(),
        topic: Topic::LetterCreated,
        payload: serde_json::json!({}),
        source_module: SourceModule::Surat,
        idempotency_key: idempotency_key.to_owned(),
        status: EventStatus::Pending,
        timestamp,
        created_at: timestamp,
        retry_count: 0,
        max_retries: 5,
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

#[derive(Debug, Default)]
struct State {
    events: Vec<Event>,
    acknowledgments: Vec<Acknowledgment>,
}

/// An in-memory event store that honours the same rules as the PostgreSQL
/// store: unique idempotency keys, one acknowledgment per consumer, version
/// compare-and-set on every update, and cascade delete of acknowledgments.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    state: Mutex<State>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with `events`.
    #[must_use]
    pub fn with_events(events: Vec<Event>) -> Self {
        Self {
            state: Mutex::new(State {
                events,
                acknowledgments: Vec::new(),
            }),
        }
    }

    /// Returns a snapshot of every stored event, in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    /// Returns a snapshot of every stored acknowledgment, in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn acknowledgments(&self) -> Vec<Acknowledgment> {
        self.state.lock().unwrap().acknowledgments.clone()
    }
}

impl State {
    fn apply_update(&mut self, event: &Event, expected_version: i64) -> Result<Event, BusError> {
        let stored = self
            .events
            .iter_mut()
            .find(|stored| stored.id == event.id)
            .ok_or(BusError::EventNotFound(event.id))?;
        if stored.version != expected_version {
            return Err(BusError::ConcurrencyConflict {
                event_id: event.id,
                expected: expected_version,
                actual: stored.version,
            });
        }
        let mut updated = event.clone();
        // Immutable columns keep their stored values, as in the SQL UPDATE.
        updated.topic = stored.topic;
        updated.payload = stored.payload.clone();
        updated.source_module = stored.source_module;
        updated.idempotency_key = stored.idempotency_key.clone();
        updated.timestamp = stored.timestamp;
        updated.created_at = stored.created_at;
        updated.version = expected_version + 1;
        *stored = updated.clone();
        Ok(updated)
    }
}

fn paginate(events: Vec<Event>, page: PageRequest) -> Page<Event> {
    let total = i64::try_from(events.len()).unwrap_or(i64::MAX);
    let offset = usize::try_from(page.offset).unwrap_or(0);
    let limit = usize::try_from(page.limit).unwrap_or(0);
    Page {
        items: events.into_iter().skip(offset).take(limit).collect(),
        total,
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn insert_event(&self, event: &Event) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        if state
            .events
            .iter()
            .any(|stored| stored.idempotency_key == event.idempotency_key)
        {
            return Err(BusError::DuplicateIdempotencyKey(
                event.idempotency_key.clone(),
            ));
        }
        state.events.push(event.clone());
        Ok(())
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, BusError> {
        let state = self.state.lock().unwrap();
        Ok(state.events.iter().find(|event| event.id == id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Event>, BusError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .find(|event| event.idempotency_key == key)
            .cloned())
    }

    async fn update_event(&self, event: &Event, expected_version: i64) -> Result<Event, BusError> {
        self.state
            .lock()
            .unwrap()
            .apply_update(event, expected_version)
    }

    async fn record_acknowledgment(
        &self,
        acknowledgment: &Acknowledgment,
        event: &Event,
        expected_version: i64,
    ) -> Result<Event, BusError> {
        let mut state = self.state.lock().unwrap();
        if state.acknowledgments.iter().any(|ack| {
            ack.event_id == acknowledgment.event_id
                && ack.consumer_module == acknowledgment.consumer_module
        }) {
            return Err(BusError::DuplicateAcknowledgment {
                event_id: acknowledgment.event_id,
                consumer_module: acknowledgment.consumer_module,
            });
        }
        let updated = state.apply_update(event, expected_version)?;
        state.acknowledgments.push(acknowledgment.clone());
        Ok(updated)
    }

    async fn find_acknowledgment(
        &self,
        event_id: Uuid,
        consumer_module: ConsumerModule,
    ) -> Result<Option<Acknowledgment>, BusError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .acknowledgments
            .iter()
            .find(|ack| ack.event_id == event_id && ack.consumer_module == consumer_module)
            .cloned())
    }

    async fn list_acknowledgments(&self, event_id: Uuid) -> Result<Vec<Acknowledgment>, BusError> {
        let state = self.state.lock().unwrap();
        let mut acks: Vec<Acknowledgment> = state
            .acknowledgments
            .iter()
            .filter(|ack| ack.event_id == event_id)
            .cloned()
            .collect();
        acks.sort_by_key(|ack| ack.acknowledged_at);
        Ok(acks)
    }

    async fn delete_dlq_event(&self, id: Uuid) -> Result<bool, BusError> {
        let mut state = self.state.lock().unwrap();
        let before = state.events.len();
        state.events.retain(|event| !(event.id == id && event.is_dlq));
        let deleted = state.events.len() < before;
        if deleted {
            state.acknowledgments.retain(|ack| ack.event_id != id);
        }
        Ok(deleted)
    }

    async fn list_events(
        &self,
        filter: &EventFilter,
        page: PageRequest,
    ) -> Result<Page<Event>, BusError> {
        let state = self.state.lock().unwrap();
        let mut events: Vec<Event> = state
            .events
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.id.cmp(&b.id)));
        Ok(paginate(events, page))
    }

    async fn count_by_status(&self) -> Result<StatusCounts, BusError> {
        let state = self.state.lock().unwrap();
        let count = |status: EventStatus| {
            i64::try_from(
                state
                    .events
                    .iter()
                    .filter(|event| event.status == status)
                    .count(),
            )
            .unwrap_or(i64::MAX)
        };
        Ok(StatusCounts {
            total: i64::try_from(state.events.len()).unwrap_or(i64::MAX),
            pending: count(EventStatus::Pending),
            consumed: count(EventStatus::Consumed),
            failed: count(EventStatus::Failed),
        })
    }

    async fn pending_events(&self) -> Result<Vec<Event>, BusError> {
        let state = self.state.lock().unwrap();
        let mut events: Vec<Event> = state
            .events
            .iter()
            .filter(|event| event.status == EventStatus::Pending)
            .cloned()
            .collect();
        events.sort_by_key(|event| (event.timestamp, event.created_at));
        Ok(events)
    }

    async fn list_dlq(
        &self,
        filter: &DlqFilter,
        page: PageRequest,
    ) -> Result<Page<Event>, BusError> {
        let state = self.state.lock().unwrap();
        let mut events: Vec<Event> = state
            .events
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            b.moved_to_dlq_at
                .cmp(&a.moved_to_dlq_at)
                .then(a.id.cmp(&b.id))
        });
        Ok(paginate(events, page))
    }

    async fn dlq_events_by_topic(&self, topic: Topic) -> Result<Vec<Event>, BusError> {
        let state = self.state.lock().unwrap();
        let mut events: Vec<Event> = state
            .events
            .iter()
            .filter(|event| event.is_dlq && event.topic == topic)
            .cloned()
            .collect();
        events.sort_by_key(|event| (event.moved_to_dlq_at, event.id));
        Ok(events)
    }

    async fn claim_due_retries(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Event>, BusError> {
        let mut state = self.state.lock().unwrap();
        let mut due: Vec<&mut Event> = state
            .events
            .iter_mut()
            .filter(|event| {
                event.status == EventStatus::Failed
                    && !event.is_dlq
                    && event.next_retry_at.is_some_and(|at| at <= now)
                    && event.claim_expires_at.is_none_or(|expires| expires <= now)
            })
            .collect();
        due.sort_by_key(|event| (event.next_retry_at, event.id));

        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(due
            .into_iter()
            .take(limit)
            .map(|event| {
                event.claimed_by = Some(worker_id.to_owned());
                event.claim_expires_at = Some(lease_until);
                event.version += 1;
                event.clone()
            })
            .collect())
    }
}

/// An event store that always returns an infrastructure error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventStore;

fn connection_refused() -> BusError {
    BusError::Infrastructure("connection refused".into())
}

#[async_trait]
impl EventStore for FailingEventStore {
    async fn insert_event(&self, _event: &Event) -> Result<(), BusError> {
        Err(connection_refused())
    }

    async fn find_event(&self, _id: Uuid) -> Result<Option<Event>, BusError> {
        Err(connection_refused())
    }

    async fn find_by_idempotency_key(&self, _key: &str) -> Result<Option<Event>, BusError> {
        Err(connection_refused())
    }

    async fn update_event(
        &self,
        _event: &Event,
        _expected_version: i64,
    ) -> Result<Event, BusError> {
        Err(connection_refused())
    }

    async fn record_acknowledgment(
        &self,
        _acknowledgment: &Acknowledgment,
        _event: &Event,
        _expected_version: i64,
    ) -> Result<Event, BusError> {
        Err(connection_refused())
    }

    async fn find_acknowledgment(
        &self,
        _event_id: Uuid,
        _consumer_module: ConsumerModule,
    ) -> Result<Option<Acknowledgment>, BusError> {
        Err(connection_refused())
    }

    async fn list_acknowledgments(
        &self,
        _event_id: Uuid,
    ) -> Result<Vec<Acknowledgment>, BusError> {
        Err(connection_refused())
    }

    async fn delete_dlq_event(&self, _id: Uuid) -> Result<bool, BusError> {
        Err(connection_refused())
    }

    async fn list_events(
        &self,
        _filter: &EventFilter,
        _page: PageRequest,
    ) -> Result<Page<Event>, BusError> {
        Err(connection_refused())
    }

    async fn count_by_status(&self) -> Result<StatusCounts, BusError> {
        Err(connection_refused())
    }

    async fn pending_events(&self) -> Result<Vec<Event>, BusError> {
        Err(connection_refused())
    }

    async fn list_dlq(
        &self,
        _filter: &DlqFilter,
        _page: PageRequest,
    ) -> Result<Page<Event>, BusError> {
        Err(connection_refused())
    }

    async fn dlq_events_by_topic(&self, _topic: Topic) -> Result<Vec<Event>, BusError> {
        Err(connection_refused())
    }

    async fn claim_due_retries(
        &self,
        _worker_id: &str,
        _now: DateTime<Utc>,
        _lease_until: DateTime<Utc>,
        _limit: i64,
    ) -> Result<Vec<Event>, BusError> {
        Err(connection_refused())
    }
}

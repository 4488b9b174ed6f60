//! `PostgreSQL` implementation of the `EventStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPool};
use sqlx::query::{QueryAs, QueryScalar};
use sqlx::{PgExecutor, Postgres};
use uuid::Uuid;

use relay_core::error::BusError;
use relay_core::event::{Acknowledgment, ConsumerModule, ErrorRecord, Event, Topic};
use relay_core::repository::{
    DlqFilter, EventFilter, EventStore, Page, PageRequest, StatusCounts,
};

use crate::schema::{
    ACKNOWLEDGMENT_COLUMNS, ACKNOWLEDGMENTS_TABLE, EVENT_COLUMNS, EVENTS_TABLE,
    UQ_EVENT_CONSUMER, UQ_IDEMPOTENCY_KEY,
};

/// PostgreSQL-backed event store.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Explains why a versioned update matched no row.
    async fn version_conflict(&self, event_id: Uuid, expected: i64) -> BusError {
        let query = format!("SELECT version FROM {EVENTS_TABLE} WHERE id = $1");
        match sqlx::query_scalar::<_, i64>(&query)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(actual)) => BusError::ConcurrencyConflict {
                event_id,
                expected,
                actual,
            },
            Ok(None) => BusError::EventNotFound(event_id),
            Err(e) => infrastructure(&e),
        }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    topic: String,
    payload: serde_json::Value,
    source_module: String,
    idempotency_key: String,
    status: String,
    timestamp: DateTime<Utc>,
    created_at: DateTime<Utc>,
    retry_count: i32,
    max_retries: i32,
    next_retry_at: Option<DateTime<Utc>>,
    last_retry_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    error_history: serde_json::Value,
    is_dlq: bool,
    moved_to_dlq_at: Option<DateTime<Utc>>,
    dlq_reason: Option<String>,
    claimed_by: Option<String>,
    claim_expires_at: Option<DateTime<Utc>>,
    version: i64,
}

impl TryFrom<EventRow> for Event {
    type Error = BusError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let error_history: Vec<ErrorRecord> = serde_json::from_value(row.error_history)
            .map_err(|e| {
                BusError::Infrastructure(format!("error history deserialization failed: {e}"))
            })?;
        Ok(Event {
            id: row.id,
            topic: stored_enum(&row.topic)?,
            payload: row.payload,
            source_module: stored_enum(&row.source_module)?,
            idempotency_key: row.idempotency_key,
            status: stored_enum(&row.status)?,
            timestamp: row.timestamp,
            created_at: row.created_at,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            next_retry_at: row.next_retry_at,
            last_retry_at: row.last_retry_at,
            last_error: row.last_error,
            error_history,
            is_dlq: row.is_dlq,
            moved_to_dlq_at: row.moved_to_dlq_at,
            dlq_reason: row.dlq_reason,
            claimed_by: row.claimed_by,
            claim_expires_at: row.claim_expires_at,
            version: row.version,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AcknowledgmentRow {
    id: Uuid,
    event_id: Uuid,
    consumer_module: String,
    processing_status: String,
    acknowledged_at: DateTime<Utc>,
    error_message: Option<String>,
}

impl TryFrom<AcknowledgmentRow> for Acknowledgment {
    type Error = BusError;

    fn try_from(row: AcknowledgmentRow) -> Result<Self, Self::Error> {
        Ok(Acknowledgment {
            id: row.id,
            event_id: row.event_id,
            consumer_module: stored_enum(&row.consumer_module)?,
            processing_status: stored_enum(&row.processing_status)?,
            acknowledged_at: row.acknowledged_at,
            error_message: row.error_message,
        })
    }
}

/// Parses a closed-set column. The CHECK constraints make a failure here a
/// schema drift, not a caller error.
fn stored_enum<T>(value: &str) -> Result<T, BusError>
where
    T: std::str::FromStr<Err = BusError>,
{
    value
        .parse()
        .map_err(|e| BusError::Infrastructure(format!("corrupt stored value: {e}")))
}

fn rows_to_events(rows: Vec<EventRow>) -> Result<Vec<Event>, BusError> {
    rows.into_iter().map(Event::try_from).collect()
}

// ---------------------------------------------------------------------------
// Error translation
// ---------------------------------------------------------------------------

fn infrastructure(err: &sqlx::Error) -> BusError {
    tracing::error!(error = %err, "event store query failed");
    BusError::Infrastructure(err.to_string())
}

/// Returns the violated unique constraint, if `err` is a unique violation.
fn unique_violation(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => db_err.constraint(),
        _ => None,
    }
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation())
}

// ---------------------------------------------------------------------------
// Dynamic filters
// ---------------------------------------------------------------------------

/// A bind parameter collected while building a WHERE clause.
#[derive(Debug, Clone, Copy)]
enum BindValue {
    Text(&'static str),
    Timestamp(DateTime<Utc>),
}

/// Builds the WHERE clause for the general listing.
///
/// Returns `(where_clause, bind_values, next_bind_index)`.
fn build_event_filter(filter: &EventFilter) -> (String, Vec<BindValue>, u32) {
    let mut conditions: Vec<String> = Vec::new();
    let mut bind_values: Vec<BindValue> = Vec::new();
    let mut bind_idx = 1u32;

    let mut push = |condition: &str, value: BindValue| {
        conditions.push(format!("{condition} ${bind_idx}"));
        bind_values.push(value);
        bind_idx += 1;
    };

    if let Some(topic) = filter.topic {
        push("topic =", BindValue::Text(topic.as_str()));
    }
    if let Some(status) = filter.status {
        push("status =", BindValue::Text(status.as_str()));
    }
    if let Some(module) = filter.source_module {
        push("source_module =", BindValue::Text(module.as_str()));
    }
    if let Some(start) = filter.start_date {
        push("timestamp >=", BindValue::Timestamp(start));
    }
    if let Some(end) = filter.end_date {
        push("timestamp <=", BindValue::Timestamp(end));
    }
    if let Some(since) = filter.since {
        push("timestamp >", BindValue::Timestamp(since));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    (where_clause, bind_values, bind_idx)
}

/// Builds the WHERE clause for the dead-letter listing.
fn build_dlq_filter(filter: &DlqFilter) -> (String, Vec<BindValue>, u32) {
    let mut conditions = vec!["is_dlq".to_owned()];
    let mut bind_values: Vec<BindValue> = Vec::new();
    let mut bind_idx = 1u32;

    if let Some(topic) = filter.topic {
        conditions.push(format!("topic = ${bind_idx}"));
        bind_values.push(BindValue::Text(topic.as_str()));
        bind_idx += 1;
    }
    if let Some(module) = filter.source_module {
        conditions.push(format!("source_module = ${bind_idx}"));
        bind_values.push(BindValue::Text(module.as_str()));
        bind_idx += 1;
    }

    (
        format!("WHERE {}", conditions.join(" AND ")),
        bind_values,
        bind_idx,
    )
}

fn bind_filter_values<'q, O>(
    mut query: QueryAs<'q, Postgres, O, PgArguments>,
    values: &[BindValue],
) -> QueryAs<'q, Postgres, O, PgArguments> {
    for value in values {
        query = match *value {
            BindValue::Text(text) => query.bind(text),
            BindValue::Timestamp(ts) => query.bind(ts),
        };
    }
    query
}

fn bind_filter_values_scalar<'q, O>(
    mut query: QueryScalar<'q, Postgres, O, PgArguments>,
    values: &[BindValue],
) -> QueryScalar<'q, Postgres, O, PgArguments> {
    for value in values {
        query = match *value {
            BindValue::Text(text) => query.bind(text),
            BindValue::Timestamp(ts) => query.bind(ts),
        };
    }
    query
}

// ---------------------------------------------------------------------------
// Versioned update
// ---------------------------------------------------------------------------

/// Writes every mutable column of `event` if the stored version still
/// equals `expected_version`. Returns `None` when no row matched.
async fn update_versioned<'e, E>(
    executor: E,
    event: &Event,
    expected_version: i64,
) -> Result<Option<EventRow>, BusError>
where
    E: PgExecutor<'e>,
{
    let error_history = serde_json::to_value(&event.error_history).map_err(|e| {
        BusError::Infrastructure(format!("error history serialization failed: {e}"))
    })?;
    let query = format!(
        "UPDATE {EVENTS_TABLE} SET \
            status = $3, retry_count = $4, max_retries = $5, next_retry_at = $6, \
            last_retry_at = $7, last_error = $8, error_history = $9, is_dlq = $10, \
            moved_to_dlq_at = $11, dlq_reason = $12, claimed_by = $13, \
            claim_expires_at = $14, version = version + 1 \
         WHERE id = $1 AND version = $2 \
         RETURNING {EVENT_COLUMNS}"
    );
    sqlx::query_as::<_, EventRow>(&query)
        .bind(event.id)
        .bind(expected_version)
        .bind(event.status.as_str())
        .bind(event.retry_count)
        .bind(event.max_retries)
        .bind(event.next_retry_at)
        .bind(event.last_retry_at)
        .bind(&event.last_error)
        .bind(error_history)
        .bind(event.is_dlq)
        .bind(event.moved_to_dlq_at)
        .bind(&event.dlq_reason)
        .bind(&event.claimed_by)
        .bind(event.claim_expires_at)
        .fetch_optional(executor)
        .await
        .map_err(|e| infrastructure(&e))
}

// ---------------------------------------------------------------------------
// EventStore
// ---------------------------------------------------------------------------

#[async_trait]
impl EventStore for PgEventStore {
    async fn insert_event(&self, event: &Event) -> Result<(), BusError> {
        let error_history = serde_json::to_value(&event.error_history).map_err(|e| {
            BusError::Infrastructure(format!("error history serialization failed: {e}"))
        })?;
        let query = format!(
            "INSERT INTO {EVENTS_TABLE} ({EVENT_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
              $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)"
        );
        sqlx::query(&query)
            .bind(event.id)
            .bind(event.topic.as_str())
            .bind(&event.payload)
            .bind(event.source_module.as_str())
            .bind(&event.idempotency_key)
            .bind(event.status.as_str())
            .bind(event.timestamp)
            .bind(event.created_at)
            .bind(event.retry_count)
            .bind(event.max_retries)
            .bind(event.next_retry_at)
            .bind(event.last_retry_at)
            .bind(&event.last_error)
            .bind(error_history)
            .bind(event.is_dlq)
            .bind(event.moved_to_dlq_at)
            .bind(&event.dlq_reason)
            .bind(&event.claimed_by)
            .bind(event.claim_expires_at)
            .bind(event.version)
            .execute(&self.pool)
            .await
            .map_err(|e| match unique_violation(&e) {
                Some(UQ_IDEMPOTENCY_KEY) => {
                    BusError::DuplicateIdempotencyKey(event.idempotency_key.clone())
                }
                _ => infrastructure(&e),
            })?;
        Ok(())
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, BusError> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM {EVENTS_TABLE} WHERE id = $1");
        sqlx::query_as::<_, EventRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| infrastructure(&e))?
            .map(Event::try_from)
            .transpose()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Event>, BusError> {
        let query =
            format!("SELECT {EVENT_COLUMNS} FROM {EVENTS_TABLE} WHERE idempotency_key = $1");
        sqlx::query_as::<_, EventRow>(&query)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| infrastructure(&e))?
            .map(Event::try_from)
            .transpose()
    }

    async fn update_event(&self, event: &Event, expected_version: i64) -> Result<Event, BusError> {
        match update_versioned(&self.pool, event, expected_version).await? {
            Some(row) => Event::try_from(row),
            None => Err(self.version_conflict(event.id, expected_version).await),
        }
    }

    async fn record_acknowledgment(
        &self,
        acknowledgment: &Acknowledgment,
        event: &Event,
        expected_version: i64,
    ) -> Result<Event, BusError> {
        let mut tx = self.pool.begin().await.map_err(|e| infrastructure(&e))?;

        let insert = format!(
            "INSERT INTO {ACKNOWLEDGMENTS_TABLE} ({ACKNOWLEDGMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6)"
        );
        sqlx::query(&insert)
            .bind(acknowledgment.id)
            .bind(acknowledgment.event_id)
            .bind(acknowledgment.consumer_module.as_str())
            .bind(acknowledgment.processing_status.as_str())
            .bind(acknowledgment.acknowledged_at)
            .bind(&acknowledgment.error_message)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if unique_violation(&e) == Some(UQ_EVENT_CONSUMER) {
                    BusError::DuplicateAcknowledgment {
                        event_id: acknowledgment.event_id,
                        consumer_module: acknowledgment.consumer_module,
                    }
                } else if is_foreign_key_violation(&e) {
                    BusError::EventNotFound(acknowledgment.event_id)
                } else {
                    infrastructure(&e)
                }
            })?;

        let Some(row) = update_versioned(&mut *tx, event, expected_version).await? else {
            // Dropping the transaction rolls back the acknowledgment insert.
            drop(tx);
            return Err(self.version_conflict(event.id, expected_version).await);
        };

        tx.commit().await.map_err(|e| infrastructure(&e))?;
        Event::try_from(row)
    }

    async fn find_acknowledgment(
        &self,
        event_id: Uuid,
        consumer_module: ConsumerModule,
    ) -> Result<Option<Acknowledgment>, BusError> {
        let query = format!(
            "SELECT {ACKNOWLEDGMENT_COLUMNS} FROM {ACKNOWLEDGMENTS_TABLE} \
             WHERE event_id = $1 AND consumer_module = $2"
        );
        sqlx::query_as::<_, AcknowledgmentRow>(&query)
            .bind(event_id)
            .bind(consumer_module.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| infrastructure(&e))?
            .map(Acknowledgment::try_from)
            .transpose()
    }

    async fn list_acknowledgments(&self, event_id: Uuid) -> Result<Vec<Acknowledgment>, BusError> {
        let query = format!(
            "SELECT {ACKNOWLEDGMENT_COLUMNS} FROM {ACKNOWLEDGMENTS_TABLE} \
             WHERE event_id = $1 ORDER BY acknowledged_at ASC, id ASC"
        );
        sqlx::query_as::<_, AcknowledgmentRow>(&query)
            .bind(event_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| infrastructure(&e))?
            .into_iter()
            .map(Acknowledgment::try_from)
            .collect()
    }

    async fn delete_dlq_event(&self, id: Uuid) -> Result<bool, BusError> {
        let query = format!("DELETE FROM {EVENTS_TABLE} WHERE id = $1 AND is_dlq");
        let result = sqlx::query(&query)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| infrastructure(&e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_events(
        &self,
        filter: &EventFilter,
        page: PageRequest,
    ) -> Result<Page<Event>, BusError> {
        let (where_clause, bind_values, bind_idx) = build_event_filter(filter);

        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM {EVENTS_TABLE} {where_clause} \
             ORDER BY timestamp DESC, id ASC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1
        );
        let rows = bind_filter_values(sqlx::query_as::<_, EventRow>(&query), &bind_values)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| infrastructure(&e))?;

        let count_query = format!("SELECT COUNT(*) FROM {EVENTS_TABLE} {where_clause}");
        let total = bind_filter_values_scalar(
            sqlx::query_scalar::<_, i64>(&count_query),
            &bind_values,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| infrastructure(&e))?;

        Ok(Page {
            items: rows_to_events(rows)?,
            total,
        })
    }

    async fn count_by_status(&self) -> Result<StatusCounts, BusError> {
        let query = format!(
            "SELECT COUNT(*), \
                    COUNT(*) FILTER (WHERE status = 'pending'), \
                    COUNT(*) FILTER (WHERE status = 'consumed'), \
                    COUNT(*) FILTER (WHERE status = 'failed') \
             FROM {EVENTS_TABLE}"
        );
        let (total, pending, consumed, failed) =
            sqlx::query_as::<_, (i64, i64, i64, i64)>(&query)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| infrastructure(&e))?;
        Ok(StatusCounts {
            total,
            pending,
            consumed,
            failed,
        })
    }

    async fn pending_events(&self) -> Result<Vec<Event>, BusError> {
        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM {EVENTS_TABLE} \
             WHERE status = 'pending' ORDER BY timestamp ASC, created_at ASC"
        );
        let rows = sqlx::query_as::<_, EventRow>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| infrastructure(&e))?;
        rows_to_events(rows)
    }

    async fn list_dlq(
        &self,
        filter: &DlqFilter,
        page: PageRequest,
    ) -> Result<Page<Event>, BusError> {
        let (where_clause, bind_values, bind_idx) = build_dlq_filter(filter);

        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM {EVENTS_TABLE} {where_clause} \
             ORDER BY moved_to_dlq_at DESC, id ASC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1
        );
        let rows = bind_filter_values(sqlx::query_as::<_, EventRow>(&query), &bind_values)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| infrastructure(&e))?;

        let count_query = format!("SELECT COUNT(*) FROM {EVENTS_TABLE} {where_clause}");
        let total = bind_filter_values_scalar(
            sqlx::query_scalar::<_, i64>(&count_query),
            &bind_values,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| infrastructure(&e))?;

        Ok(Page {
            items: rows_to_events(rows)?,
            total,
        })
    }

    async fn dlq_events_by_topic(&self, topic: Topic) -> Result<Vec<Event>, BusError> {
        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM {EVENTS_TABLE} \
             WHERE is_dlq AND topic = $1 ORDER BY moved_to_dlq_at ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, EventRow>(&query)
            .bind(topic.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| infrastructure(&e))?;
        rows_to_events(rows)
    }

    async fn claim_due_retries(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Event>, BusError> {
        // SKIP LOCKED keeps concurrent workers from claiming the same rows.
        let query = format!(
            "UPDATE {EVENTS_TABLE} SET claimed_by = $1, claim_expires_at = $2, \
                    version = version + 1 \
             WHERE id IN ( \
                 SELECT id FROM {EVENTS_TABLE} \
                 WHERE status = 'failed' AND NOT is_dlq \
                   AND next_retry_at IS NOT NULL AND next_retry_at <= $3 \
                   AND (claim_expires_at IS NULL OR claim_expires_at <= $3) \
                 ORDER BY next_retry_at ASC \
                 LIMIT $4 \
                 FOR UPDATE SKIP LOCKED) \
             RETURNING {EVENT_COLUMNS}"
        );
        let rows = sqlx::query_as::<_, EventRow>(&query)
            .bind(worker_id)
            .bind(lease_until)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| infrastructure(&e))?;

        let mut events = rows_to_events(rows)?;
        events.sort_by_key(|event| (event.next_retry_at, event.id));
        Ok(events)
    }
}

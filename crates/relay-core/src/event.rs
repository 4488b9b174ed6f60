//! Event and acknowledgment data model.
//!
//! Topics, publishing modules, consuming modules and statuses are closed
//! sets. Each enum round-trips through its wire name (`as_str` / `FromStr`),
//! which is also what the store persists.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BusError;

/// Kind of state change an event announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Topic {
    /// A letter was registered.
    #[serde(rename = "letter.created")]
    LetterCreated,
    /// A letter's details were edited.
    #[serde(rename = "letter.updated")]
    LetterUpdated,
    /// A letter moved through its disposition workflow.
    #[serde(rename = "letter.statusChanged")]
    LetterStatusChanged,
    /// A letter was removed.
    #[serde(rename = "letter.deleted")]
    LetterDeleted,
    /// A personnel record was created.
    #[serde(rename = "personnel.created")]
    PersonnelCreated,
    /// A personnel record was edited.
    #[serde(rename = "personnel.updated")]
    PersonnelUpdated,
    /// A personnel record was removed.
    #[serde(rename = "personnel.deleted")]
    PersonnelDeleted,
    /// A shipment was registered.
    #[serde(rename = "shipment.created")]
    ShipmentCreated,
    /// A shipment changed status in transit.
    #[serde(rename = "shipment.statusChanged")]
    ShipmentStatusChanged,
    /// A shipment reached its recipient.
    #[serde(rename = "shipment.delivered")]
    ShipmentDelivered,
}

impl Topic {
    /// Every topic the bus accepts.
    pub const ALL: [Topic; 10] = [
        Topic::LetterCreated,
        Topic::LetterUpdated,
        Topic::LetterStatusChanged,
        Topic::LetterDeleted,
        Topic::PersonnelCreated,
        Topic::PersonnelUpdated,
        Topic::PersonnelDeleted,
        Topic::ShipmentCreated,
        Topic::ShipmentStatusChanged,
        Topic::ShipmentDelivered,
    ];

    /// Returns the wire name of the topic.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::LetterCreated => "letter.created",
            Topic::LetterUpdated => "letter.updated",
            Topic::LetterStatusChanged => "letter.statusChanged",
            Topic::LetterDeleted => "letter.deleted",
            Topic::PersonnelCreated => "personnel.created",
            Topic::PersonnelUpdated => "personnel.updated",
            Topic::PersonnelDeleted => "personnel.deleted",
            Topic::ShipmentCreated => "shipment.created",
            Topic::ShipmentStatusChanged => "shipment.statusChanged",
            Topic::ShipmentDelivered => "shipment.delivered",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| unknown_value("topic", s, Topic::ALL.map(Topic::as_str).as_slice()))
    }
}

/// Domain module that published an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceModule {
    /// Letter tracking.
    Surat,
    /// Personnel records.
    Kepegawaian,
    /// Shipment tracking.
    Ekspedisi,
}

impl SourceModule {
    /// Every module allowed to publish.
    pub const ALL: [SourceModule; 3] = [
        SourceModule::Surat,
        SourceModule::Kepegawaian,
        SourceModule::Ekspedisi,
    ];

    /// Returns the wire name of the module.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SourceModule::Surat => "SURAT",
            SourceModule::Kepegawaian => "KEPEGAWAIAN",
            SourceModule::Ekspedisi => "EKSPEDISI",
        }
    }
}

impl fmt::Display for SourceModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceModule {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceModule::ALL
            .into_iter()
            .find(|module| module.as_str() == s)
            .ok_or_else(|| {
                unknown_value(
                    "source_module",
                    s,
                    SourceModule::ALL.map(SourceModule::as_str).as_slice(),
                )
            })
    }
}

/// Domain module that consumed an event.
///
/// Kept separate from [`SourceModule`] so the set of consumers can grow
/// without widening the set of publishers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumerModule {
    /// Letter tracking.
    Surat,
    /// Personnel records.
    Kepegawaian,
    /// Shipment tracking.
    Ekspedisi,
}

impl ConsumerModule {
    /// Every module allowed to acknowledge.
    pub const ALL: [ConsumerModule; 3] = [
        ConsumerModule::Surat,
        ConsumerModule::Kepegawaian,
        ConsumerModule::Ekspedisi,
    ];

    /// Returns the wire name of the module.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConsumerModule::Surat => "SURAT",
            ConsumerModule::Kepegawaian => "KEPEGAWAIAN",
            ConsumerModule::Ekspedisi => "EKSPEDISI",
        }
    }
}

impl fmt::Display for ConsumerModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsumerModule {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConsumerModule::ALL
            .into_iter()
            .find(|module| module.as_str() == s)
            .ok_or_else(|| {
                unknown_value(
                    "consumer_module",
                    s,
                    ConsumerModule::ALL.map(ConsumerModule::as_str).as_slice(),
                )
            })
    }
}

/// Lifecycle state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Published and waiting for a consumer.
    Pending,
    /// The last acknowledgment or retry succeeded.
    Consumed,
    /// The last acknowledgment or retry failed.
    Failed,
}

impl EventStatus {
    /// Every lifecycle state.
    pub const ALL: [EventStatus; 3] = [
        EventStatus::Pending,
        EventStatus::Consumed,
        EventStatus::Failed,
    ];

    /// Returns the wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Consumed => "consumed",
            EventStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                unknown_value("status", s, EventStatus::ALL.map(EventStatus::as_str).as_slice())
            })
    }
}

/// Outcome a consumer reports for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// The consumer processed the event.
    Success,
    /// The consumer could not process the event.
    Failure,
}

impl ProcessingStatus {
    /// Every processing outcome.
    pub const ALL: [ProcessingStatus; 2] = [ProcessingStatus::Success, ProcessingStatus::Failure];

    /// Returns the wire name of the outcome.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Success => "success",
            ProcessingStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                unknown_value(
                    "processing_status",
                    s,
                    ProcessingStatus::ALL.map(ProcessingStatus::as_str).as_slice(),
                )
            })
    }
}

fn unknown_value(field: &str, value: &str, allowed: &[&str]) -> BusError {
    BusError::Validation(format!(
        "invalid {field} '{value}'; expected one of: {}",
        allowed.join(", ")
    ))
}

/// One entry of an event's append-only failure log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
    /// The failure message.
    pub error: String,
    /// The event's retry count at the time of failure.
    pub retry_count: i32,
}

/// The unit of the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// What kind of change this event announces.
    pub topic: Topic,
    /// Opaque document describing the change.
    pub payload: serde_json::Value,
    /// The publishing module.
    pub source_module: SourceModule,
    /// Caller-supplied, globally unique deduplication key.
    pub idempotency_key: String,
    /// Lifecycle state.
    pub status: EventStatus,
    /// Logical event time.
    pub timestamp: DateTime<Utc>,
    /// Storage insertion time.
    pub created_at: DateTime<Utc>,
    /// Retries consumed so far.
    pub retry_count: i32,
    /// Retry budget.
    pub max_retries: i32,
    /// Earliest time the next retry may run.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// When the last retry completed.
    pub last_retry_at: Option<DateTime<Utc>>,
    /// Most recent failure message.
    pub last_error: Option<String>,
    /// Every failure recorded for this event, oldest first.
    pub error_history: Vec<ErrorRecord>,
    /// Whether the event is quarantined.
    pub is_dlq: bool,
    /// When the event was quarantined.
    pub moved_to_dlq_at: Option<DateTime<Utc>>,
    /// Why the event was quarantined.
    pub dlq_reason: Option<String>,
    /// Retry worker currently holding the lease.
    pub claimed_by: Option<String>,
    /// When the retry lease lapses.
    pub claim_expires_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped on every persisted mutation.
    pub version: i64,
}

impl Event {
    /// Returns `true` when `worker_id` holds a lease that is still live at `now`.
    #[must_use]
    pub fn is_claimed_by(&self, worker_id: &str, now: DateTime<Utc>) -> bool {
        self.claimed_by.as_deref() == Some(worker_id)
            && self.claim_expires_at.is_some_and(|expires| expires > now)
    }
}

/// A consumer's durable record of having processed one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgment {
    /// Unique acknowledgment identifier.
    pub id: Uuid,
    /// The owning event.
    pub event_id: Uuid,
    /// The module that processed the event.
    pub consumer_module: ConsumerModule,
    /// How processing went.
    pub processing_status: ProcessingStatus,
    /// When the acknowledgment was recorded.
    pub acknowledged_at: DateTime<Utc>,
    /// Why processing failed.
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_topic_round_trips_through_its_wire_name() {
        for topic in Topic::ALL {
            assert_eq!(topic.as_str().parse::<Topic>().unwrap(), topic);
        }
    }

    #[test]
    fn test_topic_serializes_to_wire_name() {
        let json = serde_json::to_value(Topic::LetterStatusChanged).unwrap();
        assert_eq!(json, "letter.statusChanged");
    }

    #[test]
    fn test_unknown_topic_is_a_validation_error() {
        match "letter.archived".parse::<Topic>() {
            Err(BusError::Validation(message)) => {
                assert!(message.contains("letter.archived"));
                assert!(message.contains("shipment.delivered"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_topic_parsing_is_case_sensitive() {
        assert!("LETTER.CREATED".parse::<Topic>().is_err());
    }

    #[test]
    fn test_modules_serialize_upper_case() {
        assert_eq!(serde_json::to_value(SourceModule::Surat).unwrap(), "SURAT");
        assert_eq!(
            serde_json::to_value(ConsumerModule::Kepegawaian).unwrap(),
            "KEPEGAWAIAN"
        );
        assert_eq!("EKSPEDISI".parse::<SourceModule>().unwrap(), SourceModule::Ekspedisi);
        assert_eq!(
            "EKSPEDISI".parse::<ConsumerModule>().unwrap(),
            ConsumerModule::Ekspedisi
        );
    }

    #[test]
    fn test_statuses_parse_from_lowercase() {
        assert_eq!("failed".parse::<EventStatus>().unwrap(), EventStatus::Failed);
        assert_eq!(
            "failure".parse::<ProcessingStatus>().unwrap(),
            ProcessingStatus::Failure
        );
        assert!("done".parse::<EventStatus>().is_err());
    }
}

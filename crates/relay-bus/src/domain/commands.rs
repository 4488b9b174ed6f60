//! Commands accepted by the bus.

use relay_core::event::{ConsumerModule, ProcessingStatus, SourceModule, Topic};
use uuid::Uuid;

/// Implemented by every bus command so handlers can log it uniformly.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// Dotted name used as the `command_type` log field.
    fn command_type(&self) -> &'static str;

    /// Correlation ID carried through every log line the command produces.
    fn correlation_id(&self) -> Uuid;
}

/// Command to publish a new event.
#[derive(Debug, Clone)]
pub struct PublishEvent {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// What kind of change this event announces.
    pub topic: Topic,
    /// Opaque description of the change.
    pub payload: serde_json::Value,
    /// The publishing module.
    pub source_module: SourceModule,
    /// Caller-supplied deduplication key.
    pub idempotency_key: String,
}

impl Command for PublishEvent {
    fn command_type(&self) -> &'static str {
        "bus.publish_event"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

/// Command to record a consumer's processing outcome for an event.
#[derive(Debug, Clone)]
pub struct AcknowledgeEvent {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The event being acknowledged.
    pub event_id: Uuid,
    /// The consumer reporting the outcome.
    pub consumer_module: ConsumerModule,
    /// How processing went.
    pub processing_status: ProcessingStatus,
    /// Why processing failed. Required when `processing_status` is `failure`.
    pub error_message: Option<String>,
}

impl Command for AcknowledgeEvent {
    fn command_type(&self) -> &'static str {
        "bus.acknowledge_event"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

/// Command to lease a batch of due retries to a worker.
#[derive(Debug, Clone)]
pub struct ClaimRetries {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The claiming worker.
    pub worker_id: String,
    /// Maximum number of events to lease.
    pub limit: i64,
    /// How long the lease lasts.
    pub lease: std::time::Duration,
}

impl Command for ClaimRetries {
    fn command_type(&self) -> &'static str {
        "bus.claim_retries"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

/// Command to report how a leased retry went.
#[derive(Debug, Clone)]
pub struct CompleteRetry {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The retried event.
    pub event_id: Uuid,
    /// The worker that holds the lease.
    pub worker_id: String,
    /// How the retry went.
    pub outcome: ProcessingStatus,
    /// Why the retry failed. Required when `outcome` is `failure`.
    pub error_message: Option<String>,
}

impl Command for CompleteRetry {
    fn command_type(&self) -> &'static str {
        "bus.complete_retry"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

//! Relay — API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relay_core::error::BusError;
use serde::Serialize;
use thiserror::Error;

/// Startup and runtime errors for the API server.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),

    /// Tracing or span export could not be set up.
    #[error("telemetry error: {0}")]
    Telemetry(String),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer wrapper around `BusError` that implements `IntoResponse`.
#[derive(Debug)]
pub struct ApiError(pub BusError);

impl From<BusError> for ApiError {
    fn from(err: BusError) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// The HTTP status and machine-readable code for this error.
    #[must_use]
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            BusError::EventNotFound(_) => (StatusCode::NOT_FOUND, "event_not_found"),
            BusError::NotInDlq(_) => (StatusCode::NOT_FOUND, "event_not_in_dlq"),
            BusError::DuplicateIdempotencyKey(_) => {
                (StatusCode::CONFLICT, "duplicate_idempotency_key")
            }
            BusError::DuplicateAcknowledgment { .. } => {
                (StatusCode::CONFLICT, "duplicate_acknowledgment")
            }
            BusError::AlreadyInDlq(_) => (StatusCode::CONFLICT, "already_in_dlq"),
            BusError::ConcurrencyConflict { .. } => (StatusCode::CONFLICT, "concurrency_conflict"),
            BusError::ClaimNotHeld { .. } => (StatusCode::CONFLICT, "claim_not_held"),
            BusError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            BusError::Infrastructure(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "infrastructure_error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();

        let body = ErrorBody {
            error: error_code,
            message: self.0.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

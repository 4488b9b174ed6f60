//! Helpers shared by the route unit tests.

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use relay_bus::domain::retry::RetryPolicy;
use relay_core::clock::Clock;
use relay_core::repository::EventStore;
use relay_core::rng::DeterministicRng;
use relay_test_support::{FixedClock, MockRng};
use serde_json::Value;
use tower::ServiceExt;

use crate::state::AppState;

pub(crate) fn app_state_with(event_store: Arc<dyn EventStore>) -> AppState {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(FixedClock::default());
    let rng: Arc<Mutex<dyn DeterministicRng + Send>> = Arc::new(Mutex::new(MockRng));
    AppState::new(clock, rng, event_store, RetryPolicy::default())
}

/// Sends one request and returns the status and the body: parsed JSON,
/// `Null` when empty, or the raw text for extractor rejections.
pub(crate) async fn send(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<&Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body_bytes).into_owned()))
    };
    (status, json)
}

//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Duration;
use http_body_util::BodyExt;
use relay_api::routes;
use relay_api::state::AppState;
use relay_bus::domain::retry::RetryPolicy;
use relay_core::clock::Clock;
use relay_core::rng::DeterministicRng;
use relay_event_store::pg_event_store::PgEventStore;
use relay_test_support::{FixedClock, MockRng};
use sqlx::PgPool;
use tower::ServiceExt;

/// Build the full app router with a real `PgEventStore`, the shared fixed
/// clock and a jitter-free RNG. Uses the same route structure as `main.rs`.
pub fn build_test_app(pool: PgPool) -> Router {
    build_test_app_at(pool, FixedClock::default())
}

/// Build the app with the clock moved `delta` past the shared instant, for
/// tests that wait for a retry to come due.
pub fn build_test_app_after(pool: PgPool, delta: Duration) -> Router {
    build_test_app_at(pool, FixedClock::default().advanced_by(delta))
}

fn build_test_app_at(pool: PgPool, clock: FixedClock) -> Router {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(clock);
    let rng: Arc<Mutex<dyn DeterministicRng + Send>> = Arc::new(Mutex::new(MockRng));
    let event_store = Arc::new(PgEventStore::new(pool));
    let app_state = AppState::new(clock, rng, event_store, RetryPolicy::default());

    routes::router().with_state(app_state)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap()
    };

    (status, json)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    send(app, request).await
}

/// Send a POST request without a body.
pub async fn post_empty(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

/// Send a DELETE request and return the response.
pub async fn delete(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

/// Publish a `letter.created` event from SURAT and return its id.
pub async fn publish(pool: &PgPool, idempotency_key: &str) -> uuid::Uuid {
    let (status, json) = post_json(
        build_test_app(pool.clone()),
        "/api/v1/events",
        &serde_json::json!({
            "topic": "letter.created",
            "source_module": "SURAT",
            "idempotency_key": idempotency_key,
            "payload": { "letter_id": idempotency_key }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    json["id"].as_str().unwrap().parse().unwrap()
}

/// Acknowledge `event_id` as `consumer_module` and return the response.
pub async fn acknowledge(
    pool: &PgPool,
    event_id: uuid::Uuid,
    consumer_module: &str,
    error_message: Option<&str>,
) -> (StatusCode, serde_json::Value) {
    let body = match error_message {
        Some(message) => serde_json::json!({
            "event_id": event_id,
            "consumer_module": consumer_module,
            "processing_status": "failure",
            "error_message": message
        }),
        None => serde_json::json!({
            "event_id": event_id,
            "consumer_module": consumer_module,
            "processing_status": "success"
        }),
    };
    post_json(build_test_app(pool.clone()), "/api/v1/events/ack", &body).await
}

/// Fail `event_id` once on acknowledgment and then on every retry until the
/// budget is spent, returning the quarantined event. Each retry round runs
/// an hour after the previous one so the backoff has always elapsed.
pub async fn drive_to_dlq(pool: &PgPool, event_id: uuid::Uuid) -> serde_json::Value {
    let (status, _) = acknowledge(pool, event_id, "EKSPEDISI", Some("timeout")).await;
    assert_eq!(status, StatusCode::CREATED);

    let mut event = serde_json::Value::Null;
    for round in 1..=6 {
        let delta = Duration::hours(round);
        let (status, json) = post_json(
            build_test_app_after(pool.clone(), delta),
            "/api/v1/events/retries/claim",
            &serde_json::json!({ "worker_id": "worker-1", "limit": 100 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{json}");

        let (status, json) = post_json(
            build_test_app_after(pool.clone(), delta),
            &format!("/api/v1/events/{event_id}/retry-outcome"),
            &serde_json::json!({
                "worker_id": "worker-1",
                "outcome": "failure",
                "error_message": "timeout"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{json}");
        event = json;
    }
    event
}

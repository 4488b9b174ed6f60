//! Liveness probe. Answers without touching the database so an orchestrator
//! can tell a wedged process from a slow store.

use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::state::AppState;

/// Body of GET /health.
#[derive(Debug, Serialize)]
pub struct Liveness {
    /// Always `ok` when the process can answer.
    pub status: &'static str,
    /// Crate version of the running binary.
    pub version: &'static str,
}

const LIVE: Liveness = Liveness {
    status: "ok",
    version: env!("CARGO_PKG_VERSION"),
};

async fn liveness() -> Json<Liveness> {
    Json(LIVE)
}

/// Returns the liveness router.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(liveness))
}

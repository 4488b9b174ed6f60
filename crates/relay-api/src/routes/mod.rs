//! Route modules. Every route is served under `/api/v1`.

use axum::Router;

use crate::state::AppState;

pub mod dlq;
pub mod events;
pub mod health;
mod params;
pub mod retries;
#[cfg(test)]
mod testing;

/// Returns the full API router, rooted at `/api/v1`.
pub fn router() -> Router<AppState> {
    Router::new().nest(
        "/api/v1",
        Router::new()
            .merge(health::router())
            .merge(events::router())
            .merge(dlq::router())
            .merge(retries::router()),
    )
}

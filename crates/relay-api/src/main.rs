//! Relay event bus API server entry point.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use relay_api::config::AppConfig;
use relay_api::error::AppError;
use relay_api::routes;
use relay_api::state::AppState;
use relay_api::telemetry;
use relay_core::clock::{Clock, SystemClock};
use relay_core::rng::{DeterministicRng, SystemRng};
use relay_event_store::pg_event_store::PgEventStore;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    let telemetry_guard = telemetry::init(config.otlp_endpoint.as_deref())?;

    tracing::info!("Starting Relay event bus API server");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    relay_event_store::MIGRATOR.run(&pool).await?;
    tracing::info!("database migrations applied");

    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(SystemClock);
    let rng: Arc<Mutex<dyn DeterministicRng + Send>> = Arc::new(Mutex::new(SystemRng));
    let app_state = AppState::new(
        clock,
        rng,
        Arc::new(PgEventStore::new(pool)),
        config.retry_policy,
    );

    // TODO: Replace CorsLayer::permissive() with the publishing modules' origins once they are fixed.
    let app = routes::router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))?;
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    telemetry_guard.shutdown();
    Ok(())
}

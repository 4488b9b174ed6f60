//! Relay Event Store — PostgreSQL persistence for events and acknowledgments.

pub mod pg_event_store;
pub mod schema;

/// Embedded SQL migrations for the event bus tables.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

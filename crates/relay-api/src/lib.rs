//! Relay — HTTP API for the event bus.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

//! Application layer: handlers that load events, apply domain transitions
//! and persist the result through an `EventStore`.

pub mod command_handlers;
pub mod dlq;
pub mod query_handlers;
pub mod retry_handlers;

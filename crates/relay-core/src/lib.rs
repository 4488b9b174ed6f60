//! Relay Core — shared event bus abstractions.
//!
//! This crate defines the event and acknowledgment data model, the closed
//! enumerations the bus routes on, the error taxonomy, and the storage
//! trait every other crate depends on. It contains no infrastructure code.

pub mod clock;
pub mod error;
pub mod event;
pub mod repository;
pub mod rng;

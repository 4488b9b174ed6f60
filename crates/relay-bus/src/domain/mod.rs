//! Domain layer: commands, pure lifecycle transitions and retry policy.

pub mod commands;
pub mod event_lifecycle;
pub mod retry;

//! Worker process wiring: configuration and background services.

pub mod config;
pub mod event_log;

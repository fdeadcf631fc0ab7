//! Domain types and pure policy functions for the image generation engine.
//!
//! Apart from reading environment variables in [`config`], nothing here
//! performs I/O. The engine (`imagegen-pipeline`) builds its state machine,
//! persistence and clients on these types.

pub mod config;
pub mod error;
pub mod generation;
pub mod hashing;
pub mod job_events;
pub mod reference;
pub mod types;

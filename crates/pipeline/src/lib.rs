//! Generation-batch orchestration engine.
//!
//! A batch request fans out into one provider job per requested image.
//! Each job is driven by its own poll loop until it reaches a terminal
//! status; the [`aggregator`] then derives the batch outcome. Reference
//! images are deduplicated by content hash and their provider-side copies
//! are refreshed before they expire ([`reference_cache`]).

pub mod active;
pub mod aggregator;
pub mod blobs;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ingest;
pub mod orchestrator;
pub mod reference_cache;
pub mod service;
pub mod store;

pub use aggregator::{BatchAggregator, BatchProgress};
pub use config::GenerationConfig;
pub use orchestrator::GenerationOrchestrator;
pub use reference_cache::{ReferenceImageCache, ResolvedReference};
pub use service::GenerationService;
pub use store::GenerationStore;

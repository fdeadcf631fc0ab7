//! Clients for the external generation provider.
//!
//! Defines the two seams the engine depends on, [`PredictionClient`] and
//! [`BlobUploadClient`], and a [`reqwest`]-based implementation of both for
//! a Replicate-style HTTP API.

pub mod api;
pub mod config;
pub mod error;
pub mod prediction;
pub mod upload;

pub use api::ReplicateApi;
pub use config::ReplicateConfig;
pub use error::ClientError;
pub use prediction::{PredictionClient, PredictionRequest, PredictionState, PredictionStatus};
pub use upload::{BlobUploadClient, UploadMetadata, UploadedFile};

//! Per-image generation job model and DTOs.

use imagegen_core::generation::JobStatus;
use imagegen_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `generation_jobs` table.
///
/// `external_id` is the provider's prediction id; it is `None` only for a
/// job whose submission was rejected.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GenerationJob {
    pub id: DbId,
    pub batch_id: DbId,
    pub image_index: i32,
    pub external_id: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub output_url: Option<String>,
    pub asset_id: Option<String>,
    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

/// DTO for recording a job right after its submission attempt.
#[derive(Debug, Clone)]
pub struct NewGenerationJob {
    pub batch_id: DbId,
    pub image_index: i32,
    pub external_id: Option<String>,
    pub status: JobStatus,
    pub error_message: Option<String>,
}

/// Status change written by a job's poll loop or by cancellation.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub output_url: Option<String>,
    pub asset_id: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            error_message: None,
            output_url: None,
            asset_id: None,
        }
    }

    pub fn failed(status: JobStatus, error: impl Into<String>) -> Self {
        Self {
            error_message: Some(error.into()),
            ..Self::status(status)
        }
    }

    pub fn succeeded(output_url: String, asset_id: String) -> Self {
        Self {
            output_url: Some(output_url),
            asset_id: Some(asset_id),
            ..Self::status(JobStatus::Succeeded)
        }
    }
}

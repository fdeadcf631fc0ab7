//! Batch entity model and DTOs.

use imagegen_core::generation::BatchStatus;
use imagegen_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// A row from the `batches` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Batch {
    pub id: DbId,
    pub prompt: String,
    pub requested_count: i32,
    #[sqlx(try_from = "String")]
    pub status: BatchStatus,
    pub error_message: Option<String>,
    /// Set when a dispatcher took ownership of a pending batch.
    pub claimed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

/// DTO for creating a new batch in `pending` status.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBatch {
    #[validate(length(min = 1, max = 4000))]
    pub prompt: String,
    #[validate(range(min = 1))]
    pub requested_count: i32,
    /// Reference images to link to the batch, in submission order.
    #[validate(length(max = 8))]
    pub reference_image_ids: Vec<DbId>,
    /// Create the batch already claimed, so no dispatcher picks it up.
    #[serde(default)]
    pub claimed: bool,
}

//! Reference image and external upload models.
//!
//! Covers two related tables:
//! - `reference_images` -- one row per distinct content hash
//! - `external_uploads` -- the current provider-side copy of each image

use imagegen_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `reference_images` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ReferenceImage {
    pub id: DbId,
    pub content_hash: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: Timestamp,
}

/// DTO for registering reference image bytes seen for the first time.
#[derive(Debug, Clone)]
pub struct NewReferenceImage {
    pub content_hash: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
}

/// A row from the `external_uploads` table. At most one per image.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct ExternalUpload {
    pub reference_image_id: DbId,
    pub external_id: String,
    pub expires_at: Timestamp,
    pub uploaded_at: Timestamp,
}

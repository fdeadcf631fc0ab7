//! Repository for the `external_uploads` table.

use imagegen_core::types::DbId;
use sqlx::PgPool;

use crate::models::reference_image::ExternalUpload;

const COLUMNS: &str = "reference_image_id, external_id, expires_at, uploaded_at";

/// Provides access to the current provider-side copy of reference images.
pub struct ExternalUploadRepo;

impl ExternalUploadRepo {
    /// The recorded upload for a reference image, valid or not.
    pub async fn find_current(
        pool: &PgPool,
        reference_image_id: DbId,
    ) -> Result<Option<ExternalUpload>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM external_uploads WHERE reference_image_id = $1");
        sqlx::query_as::<_, ExternalUpload>(&query)
            .bind(reference_image_id)
            .fetch_optional(pool)
            .await
    }

    /// Record a new upload, replacing any earlier one for the same image.
    pub async fn upsert(pool: &PgPool, upload: &ExternalUpload) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO external_uploads (reference_image_id, external_id, expires_at, uploaded_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (reference_image_id) DO UPDATE SET \
                 external_id = EXCLUDED.external_id, \
                 expires_at = EXCLUDED.expires_at, \
                 uploaded_at = EXCLUDED.uploaded_at",
        )
        .bind(upload.reference_image_id)
        .bind(&upload.external_id)
        .bind(upload.expires_at)
        .bind(upload.uploaded_at)
        .execute(pool)
        .await?;
        Ok(())
    }
}

//! Repository for the `generation_jobs` table.

use imagegen_core::types::DbId;
use sqlx::PgPool;

use crate::models::generation_job::{GenerationJob, JobUpdate, NewGenerationJob};

/// Column list for `generation_jobs` queries.
const COLUMNS: &str = "\
    id, batch_id, image_index, external_id, status, error_message, \
    output_url, asset_id, started_at, completed_at";

/// Provides CRUD operations for per-image generation jobs.
pub struct GenerationJobRepo;

impl GenerationJobRepo {
    /// Record a job. Terminal statuses get `completed_at` immediately.
    ///
    /// Fails with a `uq_generation_jobs_batch_index` violation if the
    /// batch already has a job at this index.
    pub async fn create(
        pool: &PgPool,
        input: &NewGenerationJob,
    ) -> Result<GenerationJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO generation_jobs \
                 (batch_id, image_index, external_id, status, error_message, completed_at) \
             VALUES ($1, $2, $3, $4, $5, CASE WHEN $6 THEN NOW() END) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationJob>(&query)
            .bind(input.batch_id)
            .bind(input.image_index)
            .bind(&input.external_id)
            .bind(input.status.as_str())
            .bind(&input.error_message)
            .bind(input.status.is_terminal())
            .fetch_one(pool)
            .await
    }

    /// Apply a status change. Only non-`None` result fields overwrite.
    pub async fn update(pool: &PgPool, id: DbId, update: &JobUpdate) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE generation_jobs SET \
                 status = $2, \
                 error_message = COALESCE($3, error_message), \
                 output_url = COALESCE($4, output_url), \
                 asset_id = COALESCE($5, asset_id), \
                 completed_at = CASE WHEN $6 THEN COALESCE(completed_at, NOW()) END \
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.status.as_str())
        .bind(&update.error_message)
        .bind(&update.output_url)
        .bind(&update.asset_id)
        .bind(update.status.is_terminal())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// All jobs of a batch ordered by image index.
    pub async fn list_by_batch(
        pool: &PgPool,
        batch_id: DbId,
    ) -> Result<Vec<GenerationJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generation_jobs \
             WHERE batch_id = $1 \
             ORDER BY image_index ASC"
        );
        sqlx::query_as::<_, GenerationJob>(&query)
            .bind(batch_id)
            .fetch_all(pool)
            .await
    }
}

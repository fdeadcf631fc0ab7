//! Repository for the `batches` and `batch_reference_images` tables.
//!
//! Status transitions are conditional updates so that concurrent callers
//! (several poll loops finishing at once) cannot move a batch twice.

use imagegen_core::generation::BatchStatus;
use imagegen_core::types::DbId;
use sqlx::PgPool;

use crate::models::batch::{Batch, CreateBatch};

/// Column list for `batches` queries.
const COLUMNS: &str = "\
    id, prompt, requested_count, status, error_message, \
    claimed_at, created_at, completed_at, updated_at";

/// Provides CRUD operations and status transitions for batches.
pub struct BatchRepo;

impl BatchRepo {
    /// Insert a new `pending` batch and link its reference images.
    ///
    /// With `claimed` set, `claimed_at` is stamped in the same insert and
    /// [`Self::claim_next_pending`] never returns the batch.
    pub async fn create(pool: &PgPool, input: &CreateBatch) -> Result<Batch, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO batches (prompt, requested_count, status, claimed_at) \
             VALUES ($1, $2, $3, CASE WHEN $4 THEN NOW() END) \
             RETURNING {COLUMNS}"
        );
        let batch = sqlx::query_as::<_, Batch>(&query)
            .bind(&input.prompt)
            .bind(input.requested_count)
            .bind(BatchStatus::Pending.as_str())
            .bind(input.claimed)
            .fetch_one(&mut *tx)
            .await?;

        for (position, reference_image_id) in input.reference_image_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO batch_reference_images (batch_id, reference_image_id, position) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(batch.id)
            .bind(reference_image_id)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(batch)
    }

    /// Find a batch by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Batch>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM batches WHERE id = $1");
        sqlx::query_as::<_, Batch>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Reference image IDs linked to a batch, in submission order.
    pub async fn reference_image_ids(
        pool: &PgPool,
        batch_id: DbId,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "SELECT reference_image_id FROM batch_reference_images \
             WHERE batch_id = $1 \
             ORDER BY position ASC",
        )
        .bind(batch_id)
        .fetch_all(pool)
        .await
    }

    /// Move a batch from `pending` to `processing`.
    ///
    /// Returns `false` if the batch was not pending.
    pub async fn mark_processing(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE batches SET status = $2 WHERE id = $1 AND status = $3")
            .bind(id)
            .bind(BatchStatus::Processing.as_str())
            .bind(BatchStatus::Pending.as_str())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a non-terminal batch to a terminal status.
    ///
    /// Returns `false` if the batch was already completed or failed, which
    /// makes repeated aggregation a no-op.
    pub async fn finalize(
        pool: &PgPool,
        id: DbId,
        status: BatchStatus,
        error_message: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE batches \
             SET status = $2, error_message = $3, completed_at = NOW() \
             WHERE id = $1 AND status IN ($4, $5)",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .bind(BatchStatus::Pending.as_str())
        .bind(BatchStatus::Processing.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Unconditionally fail a batch. Only cancellation uses this.
    pub async fn force_fail(pool: &PgPool, id: DbId, error_message: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE batches \
             SET status = $2, error_message = $3, completed_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(BatchStatus::Failed.as_str())
        .bind(error_message)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Atomically claim the oldest unclaimed pending batch.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so several workers can share
    /// one database without starting the same batch twice. The batch stays
    /// `pending`; starting it is the orchestrator's job.
    pub async fn claim_next_pending(pool: &PgPool) -> Result<Option<Batch>, sqlx::Error> {
        let query = format!(
            "UPDATE batches \
             SET claimed_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM batches \
                 WHERE status = $1 AND claimed_at IS NULL \
                 ORDER BY created_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Batch>(&query)
            .bind(BatchStatus::Pending.as_str())
            .fetch_optional(pool)
            .await
    }
}

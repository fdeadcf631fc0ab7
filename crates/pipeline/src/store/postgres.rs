use async_trait::async_trait;
use imagegen_core::generation::BatchStatus;
use imagegen_core::types::DbId;
use imagegen_db::models::batch::{Batch, CreateBatch};
use imagegen_db::models::generation_job::{GenerationJob, JobUpdate, NewGenerationJob};
use imagegen_db::models::reference_image::{ExternalUpload, NewReferenceImage, ReferenceImage};
use imagegen_db::repositories::{
    BatchRepo, ExternalUploadRepo, GenerationJobRepo, ReferenceImageRepo,
};
use imagegen_db::DbPool;

use super::GenerationStore;
use crate::error::StoreError;

const JOB_INDEX_CONSTRAINT: &str = "uq_generation_jobs_batch_index";

/// [`GenerationStore`] over the Postgres repositories.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GenerationStore for PgStore {
    async fn create_batch(&self, input: &CreateBatch) -> Result<Batch, StoreError> {
        Ok(BatchRepo::create(&self.pool, input).await?)
    }

    async fn get_batch(&self, id: DbId) -> Result<Option<Batch>, StoreError> {
        Ok(BatchRepo::find_by_id(&self.pool, id).await?)
    }

    async fn batch_reference_image_ids(&self, batch_id: DbId) -> Result<Vec<DbId>, StoreError> {
        Ok(BatchRepo::reference_image_ids(&self.pool, batch_id).await?)
    }

    async fn mark_batch_processing(&self, id: DbId) -> Result<bool, StoreError> {
        Ok(BatchRepo::mark_processing(&self.pool, id).await?)
    }

    async fn finalize_batch(
        &self,
        id: DbId,
        status: BatchStatus,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError> {
        Ok(BatchRepo::finalize(&self.pool, id, status, error_message).await?)
    }

    async fn force_fail_batch(&self, id: DbId, error_message: &str) -> Result<(), StoreError> {
        Ok(BatchRepo::force_fail(&self.pool, id, error_message).await?)
    }

    async fn claim_pending_batch(&self) -> Result<Option<Batch>, StoreError> {
        Ok(BatchRepo::claim_next_pending(&self.pool).await?)
    }

    async fn insert_job(&self, input: &NewGenerationJob) -> Result<GenerationJob, StoreError> {
        GenerationJobRepo::create(&self.pool, input)
            .await
            .map_err(|e| {
                let duplicate = e
                    .as_database_error()
                    .and_then(|db| db.constraint())
                    .is_some_and(|name| name == JOB_INDEX_CONSTRAINT);
                if duplicate {
                    StoreError::Conflict(format!(
                        "Batch {} already has a job at index {}",
                        input.batch_id, input.image_index
                    ))
                } else {
                    StoreError::Database(e)
                }
            })
    }

    async fn update_job(&self, id: DbId, update: &JobUpdate) -> Result<(), StoreError> {
        Ok(GenerationJobRepo::update(&self.pool, id, update).await?)
    }

    async fn list_jobs(&self, batch_id: DbId) -> Result<Vec<GenerationJob>, StoreError> {
        Ok(GenerationJobRepo::list_by_batch(&self.pool, batch_id).await?)
    }

    async fn insert_or_get_reference_image(
        &self,
        input: &NewReferenceImage,
    ) -> Result<(ReferenceImage, bool), StoreError> {
        Ok(ReferenceImageRepo::insert_or_get(&self.pool, input).await?)
    }

    async fn get_reference_image(&self, id: DbId) -> Result<Option<ReferenceImage>, StoreError> {
        Ok(ReferenceImageRepo::find_by_id(&self.pool, id).await?)
    }

    async fn current_upload(
        &self,
        reference_image_id: DbId,
    ) -> Result<Option<ExternalUpload>, StoreError> {
        Ok(ExternalUploadRepo::find_current(&self.pool, reference_image_id).await?)
    }

    async fn record_upload(&self, upload: &ExternalUpload) -> Result<(), StoreError> {
        Ok(ExternalUploadRepo::upsert(&self.pool, upload).await?)
    }
}

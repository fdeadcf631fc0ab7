use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use imagegen_core::generation::BatchStatus;
use imagegen_core::types::DbId;
use imagegen_db::models::batch::{Batch, CreateBatch};
use imagegen_db::models::generation_job::{GenerationJob, JobUpdate, NewGenerationJob};
use imagegen_db::models::reference_image::{ExternalUpload, NewReferenceImage, ReferenceImage};
use tokio::sync::Mutex;

use super::GenerationStore;
use crate::error::StoreError;

#[derive(Default)]
struct State {
    next_id: DbId,
    batches: BTreeMap<DbId, Batch>,
    batch_references: HashMap<DbId, Vec<DbId>>,
    jobs: BTreeMap<DbId, GenerationJob>,
    references: HashMap<DbId, ReferenceImage>,
    reference_by_hash: HashMap<String, DbId>,
    uploads: HashMap<DbId, ExternalUpload>,
}

impl State {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process [`GenerationStore`] with the same transition rules as the
/// Postgres adapter.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_open(status: BatchStatus) -> bool {
    matches!(status, BatchStatus::Pending | BatchStatus::Processing)
}

#[async_trait]
impl GenerationStore for MemoryStore {
    async fn create_batch(&self, input: &CreateBatch) -> Result<Batch, StoreError> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let now = Utc::now();
        let batch = Batch {
            id,
            prompt: input.prompt.clone(),
            requested_count: input.requested_count,
            status: BatchStatus::Pending,
            error_message: None,
            claimed_at: input.claimed.then_some(now),
            created_at: now,
            completed_at: None,
            updated_at: now,
        };
        state.batches.insert(id, batch.clone());
        state
            .batch_references
            .insert(id, input.reference_image_ids.clone());
        Ok(batch)
    }

    async fn get_batch(&self, id: DbId) -> Result<Option<Batch>, StoreError> {
        Ok(self.state.lock().await.batches.get(&id).cloned())
    }

    async fn batch_reference_image_ids(&self, batch_id: DbId) -> Result<Vec<DbId>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .batch_references
            .get(&batch_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_batch_processing(&self, id: DbId) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.batches.get_mut(&id) {
            Some(batch) if batch.status == BatchStatus::Pending => {
                batch.status = BatchStatus::Processing;
                batch.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finalize_batch(
        &self,
        id: DbId,
        status: BatchStatus,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.batches.get_mut(&id) {
            Some(batch) if is_open(batch.status) => {
                let now = Utc::now();
                batch.status = status;
                batch.error_message = error_message.map(str::to_string);
                batch.completed_at = Some(now);
                batch.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn force_fail_batch(&self, id: DbId, error_message: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(batch) = state.batches.get_mut(&id) {
            let now = Utc::now();
            batch.status = BatchStatus::Failed;
            batch.error_message = Some(error_message.to_string());
            batch.completed_at = Some(now);
            batch.updated_at = now;
        }
        Ok(())
    }

    async fn claim_pending_batch(&self) -> Result<Option<Batch>, StoreError> {
        let mut state = self.state.lock().await;
        let claimed = state
            .batches
            .values_mut()
            .find(|b| b.status == BatchStatus::Pending && b.claimed_at.is_none())
            .map(|batch| {
                batch.claimed_at = Some(Utc::now());
                batch.clone()
            });
        Ok(claimed)
    }

    async fn insert_job(&self, input: &NewGenerationJob) -> Result<GenerationJob, StoreError> {
        let mut state = self.state.lock().await;
        let taken = state
            .jobs
            .values()
            .any(|j| j.batch_id == input.batch_id && j.image_index == input.image_index);
        if taken {
            return Err(StoreError::Conflict(format!(
                "Batch {} already has a job at index {}",
                input.batch_id, input.image_index
            )));
        }

        let id = state.next_id();
        let now = Utc::now();
        let job = GenerationJob {
            id,
            batch_id: input.batch_id,
            image_index: input.image_index,
            external_id: input.external_id.clone(),
            status: input.status,
            error_message: input.error_message.clone(),
            output_url: None,
            asset_id: None,
            started_at: now,
            completed_at: input.status.is_terminal().then_some(now),
        };
        state.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn update_job(&self, id: DbId, update: &JobUpdate) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&id) {
            job.status = update.status;
            if let Some(message) = &update.error_message {
                job.error_message = Some(message.clone());
            }
            if let Some(url) = &update.output_url {
                job.output_url = Some(url.clone());
            }
            if let Some(asset) = &update.asset_id {
                job.asset_id = Some(asset.clone());
            }
            job.completed_at = if update.status.is_terminal() {
                job.completed_at.or_else(|| Some(Utc::now()))
            } else {
                None
            };
        }
        Ok(())
    }

    async fn list_jobs(&self, batch_id: DbId) -> Result<Vec<GenerationJob>, StoreError> {
        let state = self.state.lock().await;
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|j| j.batch_id == batch_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.image_index);
        Ok(jobs)
    }

    async fn insert_or_get_reference_image(
        &self,
        input: &NewReferenceImage,
    ) -> Result<(ReferenceImage, bool), StoreError> {
        let mut state = self.state.lock().await;
        let existing = state
            .reference_by_hash
            .get(&input.content_hash)
            .and_then(|id| state.references.get(id))
            .cloned();
        if let Some(image) = existing {
            return Ok((image, false));
        }

        let id = state.next_id();
        let image = ReferenceImage {
            id,
            content_hash: input.content_hash.clone(),
            filename: input.filename.clone(),
            content_type: input.content_type.clone(),
            size_bytes: input.size_bytes,
            created_at: Utc::now(),
        };
        state.references.insert(id, image.clone());
        state
            .reference_by_hash
            .insert(input.content_hash.clone(), id);
        Ok((image, true))
    }

    async fn get_reference_image(&self, id: DbId) -> Result<Option<ReferenceImage>, StoreError> {
        Ok(self.state.lock().await.references.get(&id).cloned())
    }

    async fn current_upload(
        &self,
        reference_image_id: DbId,
    ) -> Result<Option<ExternalUpload>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .uploads
            .get(&reference_image_id)
            .cloned())
    }

    async fn record_upload(&self, upload: &ExternalUpload) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .uploads
            .insert(upload.reference_image_id, upload.clone());
        Ok(())
    }
}

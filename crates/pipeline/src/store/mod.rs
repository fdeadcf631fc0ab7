//! Persistence port of the engine.
//!
//! The orchestrator, aggregator and reference cache talk to storage only
//! through [`GenerationStore`]. [`PgStore`] is the production adapter;
//! [`MemoryStore`] backs tests and single-process runs.

mod memory;
mod postgres;

use async_trait::async_trait;
use imagegen_core::generation::BatchStatus;
use imagegen_core::types::DbId;
use imagegen_db::models::batch::{Batch, CreateBatch};
use imagegen_db::models::generation_job::{GenerationJob, JobUpdate, NewGenerationJob};
use imagegen_db::models::reference_image::{ExternalUpload, NewReferenceImage, ReferenceImage};

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait GenerationStore: Send + Sync {
    // -- Batches --

    async fn create_batch(&self, input: &CreateBatch) -> Result<Batch, StoreError>;

    async fn get_batch(&self, id: DbId) -> Result<Option<Batch>, StoreError>;

    /// Reference images linked to a batch, in submission order.
    async fn batch_reference_image_ids(&self, batch_id: DbId) -> Result<Vec<DbId>, StoreError>;

    /// `pending -> processing`. Returns `false` if the batch was not pending.
    async fn mark_batch_processing(&self, id: DbId) -> Result<bool, StoreError>;

    /// Move a non-terminal batch to `status`. Returns `false` if the batch
    /// was already terminal.
    async fn finalize_batch(
        &self,
        id: DbId,
        status: BatchStatus,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Fail a batch whatever its current status.
    async fn force_fail_batch(&self, id: DbId, error_message: &str) -> Result<(), StoreError>;

    /// Atomically claim the oldest unclaimed pending batch.
    async fn claim_pending_batch(&self) -> Result<Option<Batch>, StoreError>;

    // -- Jobs --

    /// Fails with [`StoreError::Conflict`] if the index is already taken.
    async fn insert_job(&self, input: &NewGenerationJob) -> Result<GenerationJob, StoreError>;

    async fn update_job(&self, id: DbId, update: &JobUpdate) -> Result<(), StoreError>;

    /// Jobs of a batch ordered by image index.
    async fn list_jobs(&self, batch_id: DbId) -> Result<Vec<GenerationJob>, StoreError>;

    // -- Reference images --

    /// Insert a reference image or return the one with the same content
    /// hash. The flag is `true` when a new record was created.
    async fn insert_or_get_reference_image(
        &self,
        input: &NewReferenceImage,
    ) -> Result<(ReferenceImage, bool), StoreError>;

    async fn get_reference_image(&self, id: DbId) -> Result<Option<ReferenceImage>, StoreError>;

    async fn current_upload(
        &self,
        reference_image_id: DbId,
    ) -> Result<Option<ExternalUpload>, StoreError>;

    /// Record an upload, replacing the previous one for the same image.
    async fn record_upload(&self, upload: &ExternalUpload) -> Result<(), StoreError>;
}

//! Entry points for new batches and reruns.
//!
//! [`GenerationService`] ties the reference cache to the orchestrator: it
//! resolves reference images to valid provider URLs, persists the batch and
//! hands it to [`GenerationOrchestrator::start_batch`].

use std::sync::Arc;

use imagegen_core::error::CoreError;
use imagegen_core::generation::{validate_batch_request, BatchStatus, MAX_REFERENCE_IMAGES};
use imagegen_core::types::DbId;
use imagegen_db::models::batch::{Batch, CreateBatch};
use validator::Validate;

use crate::orchestrator::GenerationOrchestrator;
use crate::reference_cache::{ReferenceImageCache, ReferenceWarning};
use crate::store::GenerationStore;

/// A reference image supplied with a new batch.
#[derive(Debug, Clone)]
pub struct ReferenceUpload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: String,
}

/// Result of [`GenerationService::rerun`].
#[derive(Debug, Clone)]
pub struct RerunOutcome {
    pub batch: Batch,
    /// Reference images of the original batch that had to be dropped.
    pub warnings: Vec<ReferenceWarning>,
}

pub struct GenerationService {
    store: Arc<dyn GenerationStore>,
    cache: Arc<ReferenceImageCache>,
    orchestrator: GenerationOrchestrator,
}

impl GenerationService {
    pub fn new(
        store: Arc<dyn GenerationStore>,
        cache: Arc<ReferenceImageCache>,
        orchestrator: GenerationOrchestrator,
    ) -> Self {
        Self {
            store,
            cache,
            orchestrator,
        }
    }

    pub fn orchestrator(&self) -> &GenerationOrchestrator {
        &self.orchestrator
    }

    /// Create a batch from a prompt and optional reference images, then
    /// start it.
    ///
    /// Invalid input is rejected before anything is stored. If a reference
    /// image cannot be registered, the batch is recorded as failed with
    /// that error.
    pub async fn submit(
        &self,
        prompt: &str,
        requested_count: u32,
        references: Vec<ReferenceUpload>,
    ) -> Result<Batch, CoreError> {
        validate_batch_request(prompt, requested_count, self.orchestrator.config().max_outputs)?;
        if references.len() > MAX_REFERENCE_IMAGES {
            return Err(CoreError::Validation(format!(
                "At most {MAX_REFERENCE_IMAGES} reference images are allowed, got {}",
                references.len()
            )));
        }

        let mut reference_image_ids = Vec::with_capacity(references.len());
        let mut reference_urls = Vec::with_capacity(references.len());
        for upload in references {
            match self
                .cache
                .resolve(upload.bytes, &upload.filename, &upload.content_type)
                .await
            {
                Ok(resolved) => {
                    reference_image_ids.push(resolved.reference_image_id);
                    reference_urls.push(resolved.external_url);
                }
                Err(err) => {
                    self.record_failed_batch(prompt, requested_count, &err).await;
                    return Err(err);
                }
            }
        }

        let batch = self
            .create_batch(prompt, requested_count, reference_image_ids)
            .await?;
        self.orchestrator
            .start_batch(batch.id, prompt, requested_count, reference_urls)
            .await?;
        self.reload(batch.id).await
    }

    /// Start a new batch with the prompt and reference images of an
    /// earlier one.
    ///
    /// Reference images whose provider copies expired are re-uploaded from
    /// local bytes. Images that cannot be refreshed are dropped and
    /// reported as warnings.
    pub async fn rerun(
        &self,
        batch_id: DbId,
        requested_count: Option<u32>,
    ) -> Result<RerunOutcome, CoreError> {
        let original = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "batch",
                id: batch_id,
            })?;
        let requested_count = match requested_count {
            Some(count) => count,
            None => u32::try_from(original.requested_count).map_err(|_| {
                CoreError::Internal(format!(
                    "Batch {batch_id} has invalid requested count {}",
                    original.requested_count
                ))
            })?,
        };
        validate_batch_request(
            &original.prompt,
            requested_count,
            self.orchestrator.config().max_outputs,
        )?;

        let reference_ids = self.store.batch_reference_image_ids(batch_id).await?;
        let report = self.cache.ensure_valid(&reference_ids).await;
        if !report.warnings.is_empty() {
            tracing::warn!(
                batch_id,
                dropped = report.warnings.len(),
                kept = report.resolved.len(),
                "Rerunning with fewer reference images",
            );
        }

        let batch = self
            .create_batch(&original.prompt, requested_count, report.reference_image_ids())
            .await?;
        tracing::info!(batch_id = batch.id, rerun_of = batch_id, "Rerunning batch");
        self.orchestrator
            .start_batch(batch.id, &original.prompt, requested_count, report.urls())
            .await?;

        Ok(RerunOutcome {
            batch: self.reload(batch.id).await?,
            warnings: report.warnings,
        })
    }

    async fn create_batch(
        &self,
        prompt: &str,
        requested_count: u32,
        reference_image_ids: Vec<DbId>,
    ) -> Result<Batch, CoreError> {
        let input = CreateBatch {
            prompt: prompt.to_string(),
            requested_count: requested_count as i32,
            reference_image_ids,
            // Started right here, never by a dispatcher.
            claimed: true,
        };
        input
            .validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        Ok(self.store.create_batch(&input).await?)
    }

    async fn record_failed_batch(&self, prompt: &str, requested_count: u32, err: &CoreError) {
        let result = async {
            let batch = self.create_batch(prompt, requested_count, Vec::new()).await?;
            self.store
                .finalize_batch(batch.id, BatchStatus::Failed, Some(&err.to_string()))
                .await?;
            Ok::<DbId, CoreError>(batch.id)
        }
        .await;

        match result {
            Ok(batch_id) => {
                tracing::warn!(batch_id, error = %err, "Batch failed during submission")
            }
            Err(e) => tracing::error!(error = %e, "Failed to record failed batch"),
        }
    }

    async fn reload(&self, batch_id: DbId) -> Result<Batch, CoreError> {
        self.store
            .get_batch(batch_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "batch",
                id: batch_id,
            })
    }
}

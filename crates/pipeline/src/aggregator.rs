//! Batch status aggregation.
//!
//! Invoked whenever a job reaches a terminal status. The batch outcome is
//! derived from the persisted job statuses with
//! [`imagegen_core::generation::aggregate`], and written through the
//! store's conditional `finalize_batch`, so re-running the aggregator on a
//! finished batch changes nothing.

use std::sync::Arc;

use imagegen_core::error::CoreError;
use imagegen_core::generation::{aggregate, BatchStatus, JobTally};
use imagegen_core::job_events::{EVENT_BATCH_COMPLETED, EVENT_BATCH_FAILED};
use imagegen_core::types::DbId;
use imagegen_events::{EventBus, GenerationEvent};
use serde::Serialize;

use crate::store::GenerationStore;

/// Point-in-time view of a batch and its jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub batch_id: DbId,
    pub status: BatchStatus,
    pub requested_count: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub active: u32,
    pub error_message: Option<String>,
}

pub struct BatchAggregator {
    store: Arc<dyn GenerationStore>,
    events: Arc<EventBus>,
}

impl BatchAggregator {
    pub fn new(store: Arc<dyn GenerationStore>, events: Arc<EventBus>) -> Self {
        Self { store, events }
    }

    /// Re-derive the batch status after one of its jobs finished.
    ///
    /// Returns the status written, or `None` when the batch is still in
    /// progress or was already terminal.
    pub async fn on_job_terminal(&self, batch_id: DbId) -> Result<Option<BatchStatus>, CoreError> {
        let batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "batch",
                id: batch_id,
            })?;
        if batch.status.is_terminal() {
            tracing::debug!(batch_id, status = %batch.status, "Batch already terminal");
            return Ok(None);
        }

        let jobs = self.store.list_jobs(batch_id).await?;
        let tally = JobTally::from_statuses(jobs.iter().map(|job| job.status));
        let outcome = aggregate(&tally);
        let Some(status) = outcome.status() else {
            return Ok(None);
        };

        if !self
            .store
            .finalize_batch(batch_id, status, outcome.error_message())
            .await?
        {
            tracing::debug!(batch_id, "Batch finalized concurrently");
            return Ok(None);
        }

        let event_type = match status {
            BatchStatus::Completed => {
                tracing::info!(
                    batch_id,
                    succeeded = tally.succeeded,
                    failed = tally.failed,
                    "Batch completed",
                );
                EVENT_BATCH_COMPLETED
            }
            _ => {
                tracing::warn!(batch_id, failed = tally.failed, "Batch failed");
                EVENT_BATCH_FAILED
            }
        };
        self.events.publish(
            GenerationEvent::new(event_type, batch_id).with_payload(serde_json::json!({
                "succeeded": tally.succeeded,
                "failed": tally.failed,
                "error": outcome.error_message(),
            })),
        );

        Ok(Some(status))
    }

    pub async fn progress(&self, batch_id: DbId) -> Result<BatchProgress, CoreError> {
        let batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "batch",
                id: batch_id,
            })?;
        let jobs = self.store.list_jobs(batch_id).await?;
        let tally = JobTally::from_statuses(jobs.iter().map(|job| job.status));

        Ok(BatchProgress {
            batch_id,
            status: batch.status,
            requested_count: u32::try_from(batch.requested_count).unwrap_or(0),
            succeeded: tally.succeeded,
            failed: tally.failed,
            active: tally.active,
            error_message: batch.error_message,
        })
    }
}

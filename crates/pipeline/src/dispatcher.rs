//! Background dispatch of pending batches.
//!
//! Batches created by other processes are stored as `pending`. The
//! [`BatchDispatcher`] claims them one at a time, refreshes their reference
//! images and starts them on the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use imagegen_core::error::CoreError;
use imagegen_db::models::batch::Batch;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::GenerationOrchestrator;
use crate::reference_cache::ReferenceImageCache;
use crate::store::GenerationStore;

/// Most batches claimed in one tick.
const MAX_CLAIMS_PER_TICK: usize = 16;

pub struct BatchDispatcher {
    store: Arc<dyn GenerationStore>,
    cache: Arc<ReferenceImageCache>,
    orchestrator: GenerationOrchestrator,
    interval: Duration,
}

impl BatchDispatcher {
    pub fn new(
        store: Arc<dyn GenerationStore>,
        cache: Arc<ReferenceImageCache>,
        orchestrator: GenerationOrchestrator,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            orchestrator,
            interval,
        }
    }

    /// Claim and start pending batches every `interval` until `cancel`
    /// fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Batch dispatcher started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Batch dispatcher stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.dispatch_pending().await {
                        Ok(0) => {}
                        Ok(n) => tracing::debug!(dispatched = n, "Dispatched pending batches"),
                        Err(e) => tracing::error!(error = %e, "Batch dispatch failed"),
                    }
                }
            }
        }
    }

    /// Claim and start up to [`MAX_CLAIMS_PER_TICK`] pending batches.
    /// Returns how many were claimed.
    pub async fn dispatch_pending(&self) -> Result<usize, CoreError> {
        let mut claimed = 0;
        while claimed < MAX_CLAIMS_PER_TICK {
            let Some(batch) = self.store.claim_pending_batch().await? else {
                break;
            };
            claimed += 1;
            self.dispatch(batch).await;
        }
        Ok(claimed)
    }

    async fn dispatch(&self, batch: Batch) {
        let reference_ids = match self.store.batch_reference_image_ids(batch.id).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(batch_id = batch.id, error = %e, "Failed to load batch references");
                Vec::new()
            }
        };
        let report = self.cache.ensure_valid(&reference_ids).await;

        // Out-of-range counts are rejected by start_batch, which fails the batch.
        let requested_count = u32::try_from(batch.requested_count).unwrap_or(0);
        if let Err(e) = self
            .orchestrator
            .start_batch(batch.id, &batch.prompt, requested_count, report.urls())
            .await
        {
            tracing::warn!(batch_id = batch.id, error = %e, code = e.code(), "Failed to start claimed batch");
        }
    }
}

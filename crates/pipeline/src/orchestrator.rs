//! Job orchestration.
//!
//! [`GenerationOrchestrator::start_batch`] fans a batch out into one
//! provider prediction per requested image and spawns a poll loop for each.
//! A poll loop ends when its job reaches a terminal status, when the wait
//! budget runs out, or when the job is cancelled. Every terminal transition
//! is reported to the [`BatchAggregator`].
//!
//! Poll loops run on a [`TaskTracker`] under a master
//! [`CancellationToken`]; [`GenerationOrchestrator::shutdown`] cancels the
//! token and waits for the loops to exit.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use imagegen_core::error::CoreError;
use imagegen_core::generation::{
    validate_batch_request, BatchStatus, JobStatus, CANCELED_MESSAGE, OUTPUTS_PER_JOB,
};
use imagegen_core::job_events::{
    EVENT_BATCH_CANCELED, EVENT_BATCH_FAILED, EVENT_BATCH_STARTED, EVENT_JOB_FINISHED,
    EVENT_JOB_SUBMITTED, EVENT_JOB_SUBMIT_FAILED,
};
use imagegen_core::types::DbId;
use imagegen_db::models::generation_job::{JobUpdate, NewGenerationJob};
use imagegen_events::{EventBus, GenerationEvent};
use imagegen_replicate::{PredictionClient, PredictionRequest};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::active::{ActiveJob, ActiveJobSnapshot, ActiveJobs};
use crate::aggregator::{BatchAggregator, BatchProgress};
use crate::config::GenerationConfig;
use crate::ingest::ImageIngestor;
use crate::store::GenerationStore;

/// Drives batches through the provider. Cheap to clone.
#[derive(Clone)]
pub struct GenerationOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn GenerationStore>,
    predictor: Arc<dyn PredictionClient>,
    ingestor: Arc<dyn ImageIngestor>,
    aggregator: BatchAggregator,
    events: Arc<EventBus>,
    active: ActiveJobs,
    /// Batches whose fan-out is still submitting jobs, with a token that
    /// `cancel_batch` fires to stop it. Aggregation waits until fan-out is
    /// done so a fast failure cannot close the batch early.
    submitting: Mutex<HashMap<DbId, CancellationToken>>,
    config: GenerationConfig,
    /// Master token, cancelled on shutdown. Each job holds a child.
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl GenerationOrchestrator {
    pub fn new(
        store: Arc<dyn GenerationStore>,
        predictor: Arc<dyn PredictionClient>,
        ingestor: Arc<dyn ImageIngestor>,
        events: Arc<EventBus>,
        config: GenerationConfig,
    ) -> Self {
        let aggregator = BatchAggregator::new(Arc::clone(&store), Arc::clone(&events));
        Self {
            inner: Arc::new(Inner {
                store,
                predictor,
                ingestor,
                aggregator,
                events,
                active: ActiveJobs::new(),
                submitting: Mutex::new(HashMap::new()),
                config,
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.inner.config
    }

    /// Submit one prediction per requested image and start polling them.
    ///
    /// The batch must be `pending`. Validation or state errors fail the
    /// batch before anything is submitted. A submission failure for one
    /// image is recorded on that image's job and does not stop the others.
    pub async fn start_batch(
        &self,
        batch_id: DbId,
        prompt: &str,
        requested_count: u32,
        reference_urls: Vec<String>,
    ) -> Result<(), CoreError> {
        let inner = &self.inner;
        let batch = inner
            .store
            .get_batch(batch_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "batch",
                id: batch_id,
            })?;

        if batch.status != BatchStatus::Pending {
            let err = CoreError::InvalidState(format!(
                "Batch {batch_id} is {} and cannot be started",
                batch.status
            ));
            inner.fail_batch(batch_id, &err).await;
            return Err(err);
        }
        if let Err(err) = validate_batch_request(prompt, requested_count, inner.config.max_outputs)
        {
            inner.fail_batch(batch_id, &err).await;
            return Err(err);
        }
        if !inner.store.mark_batch_processing(batch_id).await? {
            return Err(CoreError::InvalidState(format!(
                "Batch {batch_id} was started concurrently"
            )));
        }

        tracing::info!(
            batch_id,
            requested_count,
            references = reference_urls.len(),
            "Starting generation batch",
        );
        inner.events.publish(
            GenerationEvent::new(EVENT_BATCH_STARTED, batch_id).with_payload(serde_json::json!({
                "requested_count": requested_count,
            })),
        );

        let request = PredictionRequest {
            prompt: prompt.to_string(),
            output_count: OUTPUTS_PER_JOB,
            reference_urls,
        };

        let fan_out = CancellationToken::new();
        inner.submitting.lock().await.insert(batch_id, fan_out.clone());
        for image_index in 0..requested_count {
            if inner.cancel.is_cancelled()
                || fan_out.is_cancelled()
                || !inner.batch_is_open(batch_id).await
            {
                tracing::info!(batch_id, image_index, "Batch closed during fan-out, stopping");
                break;
            }
            inner.submit_job(batch_id, image_index, &request).await;
        }
        inner.submitting.lock().await.remove(&batch_id);

        // Jobs that finished during fan-out skipped aggregation.
        inner.notify_terminal(batch_id).await;
        Ok(())
    }

    /// Cancel every active job of a batch and fail the batch.
    ///
    /// Fails with `NotFound` when the batch has no active jobs. Remote
    /// cancellation is best effort; the batch is failed regardless of its
    /// current status.
    pub async fn cancel_batch(&self, batch_id: DbId) -> Result<(), CoreError> {
        let inner = &self.inner;
        let jobs = {
            // Held across the take so a job registered by a concurrent
            // fan-out is either taken here or sees the fired token.
            let submitting = inner.submitting.lock().await;
            let jobs = inner.active.take_batch(batch_id).await;
            if !jobs.is_empty() {
                if let Some(fan_out) = submitting.get(&batch_id) {
                    fan_out.cancel();
                }
            }
            jobs
        };
        if jobs.is_empty() {
            return Err(CoreError::NotFound {
                entity: "active generation for batch",
                id: batch_id,
            });
        }

        tracing::info!(batch_id, jobs = jobs.len(), "Cancelling generation batch");
        join_all(jobs.iter().map(|job| inner.cancel_job(job))).await;

        inner
            .store
            .force_fail_batch(batch_id, CANCELED_MESSAGE)
            .await?;
        inner.events.publish(
            GenerationEvent::new(EVENT_BATCH_CANCELED, batch_id).with_payload(serde_json::json!({
                "canceled_jobs": jobs.len(),
            })),
        );
        Ok(())
    }

    /// Jobs of a batch that still have a live poll loop.
    pub async fn active_jobs(&self, batch_id: DbId) -> Vec<ActiveJobSnapshot> {
        self.inner.active.snapshot_batch(batch_id).await
    }

    pub async fn active_job_count(&self) -> usize {
        self.inner.active.len().await
    }

    pub async fn progress(&self, batch_id: DbId) -> Result<BatchProgress, CoreError> {
        self.inner.aggregator.progress(batch_id).await
    }

    /// Stop all poll loops and wait up to the configured timeout for them
    /// to exit. Jobs are left as they are in storage.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        tracing::info!(
            active_jobs = inner.active.len().await,
            "Shutting down generation orchestrator",
        );
        inner.cancel.cancel();
        inner.tasks.close();

        if tokio::time::timeout(inner.config.shutdown_timeout, inner.tasks.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = inner.tasks.len(),
                "Poll loops did not stop before the shutdown timeout",
            );
        }
        tracing::info!("Generation orchestrator shut down complete");
    }
}

impl Inner {
    async fn submit_job(self: &Arc<Self>, batch_id: DbId, image_index: u32, request: &PredictionRequest) {
        let job_id = match self.predictor.submit(request).await {
            Ok(job_id) => job_id,
            Err(e) => {
                let err = CoreError::from(e);
                tracing::warn!(batch_id, image_index, error = %err, "Prediction submission failed");
                let failed = NewGenerationJob {
                    batch_id,
                    image_index: image_index as i32,
                    external_id: None,
                    status: JobStatus::Failed,
                    error_message: Some(err.to_string()),
                };
                if let Err(e) = self.store.insert_job(&failed).await {
                    tracing::error!(batch_id, image_index, error = %e, "Failed to record failed submission");
                }
                self.events.publish(
                    GenerationEvent::new(EVENT_JOB_SUBMIT_FAILED, batch_id)
                        .with_job(None, image_index)
                        .with_payload(serde_json::json!({ "error": err.to_string() })),
                );
                return;
            }
        };

        let record = match self
            .store
            .insert_job(&NewGenerationJob {
                batch_id,
                image_index: image_index as i32,
                external_id: Some(job_id.clone()),
                status: JobStatus::Starting,
                error_message: None,
            })
            .await
        {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(batch_id, image_index, job_id = %job_id, error = %e, "Failed to record job");
                if let Err(e) = self.predictor.cancel(&job_id).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to cancel unrecorded prediction");
                }
                return;
            }
        };

        let job = ActiveJob {
            job_id: job_id.clone(),
            record_id: record.id,
            batch_id,
            image_index,
            status: JobStatus::Starting,
            started_at: record.started_at,
            cancel: self.cancel.child_token(),
        };
        self.active.insert(job.clone()).await;
        if self.fan_out_canceled(batch_id).await {
            if self.active.remove(&job_id).await.is_some() {
                tracing::info!(batch_id, image_index, job_id = %job_id, "Batch canceled during submission");
                self.cancel_job(&job).await;
            }
            return;
        }

        tracing::info!(batch_id, image_index, job_id = %job_id, "Prediction submitted");
        self.events.publish(
            GenerationEvent::new(EVENT_JOB_SUBMITTED, batch_id).with_job(Some(&job_id), image_index),
        );

        let inner = Arc::clone(self);
        self.tasks.spawn(async move {
            inner.poll_until_terminal(job).await;
        });
    }

    async fn poll_until_terminal(self: Arc<Self>, job: ActiveJob) {
        let deadline = tokio::time::Instant::now() + self.config.max_wait;

        loop {
            let wake = (tokio::time::Instant::now() + self.config.poll_interval).min(deadline);
            tokio::select! {
                _ = job.cancel.cancelled() => {
                    tracing::debug!(job_id = %job.job_id, "Poll loop cancelled");
                    return;
                }
                _ = tokio::time::sleep_until(wake) => {}
            }

            if !self.active.contains(&job.job_id).await {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                self.time_out(&job).await;
                return;
            }

            let state = match self.predictor.get_status(&job.job_id).await {
                Ok(state) => state,
                Err(e) if e.is_transient() => {
                    tracing::warn!(job_id = %job.job_id, error = %e, "Status check failed, retrying");
                    continue;
                }
                Err(e) => {
                    let err = CoreError::from(e);
                    tracing::warn!(job_id = %job.job_id, error = %err, "Status check rejected");
                    self.finish(&job, JobUpdate::failed(JobStatus::Failed, err.to_string()))
                        .await;
                    return;
                }
            };

            let status = JobStatus::from(state.status);
            if !status.is_terminal() {
                let previous = self.active.set_status(&job.job_id, status).await;
                if previous.is_some_and(|p| p != status) {
                    tracing::debug!(job_id = %job.job_id, status = %status, "Job status changed");
                    if let Err(e) = self.store.update_job(job.record_id, &JobUpdate::status(status)).await {
                        tracing::warn!(job_id = %job.job_id, error = %e, "Failed to record job status");
                    }
                }
                continue;
            }

            let update = match status {
                JobStatus::Succeeded => self.ingest_output(&job, state.output_url).await,
                other => JobUpdate::failed(
                    other,
                    state.error.unwrap_or_else(|| format!("Prediction {other}")),
                ),
            };
            self.finish(&job, update).await;
            return;
        }
    }

    async fn ingest_output(&self, job: &ActiveJob, output_url: Option<String>) -> JobUpdate {
        let Some(url) = output_url else {
            return JobUpdate::failed(JobStatus::Failed, "Prediction succeeded without an output");
        };

        match self.ingestor.ingest(&url, job.batch_id).await {
            Ok(asset_id) => JobUpdate::succeeded(url, asset_id),
            Err(e) => {
                tracing::warn!(job_id = %job.job_id, error = %e, "Failed to ingest output");
                JobUpdate {
                    output_url: Some(url),
                    ..JobUpdate::failed(JobStatus::Failed, e.to_string())
                }
            }
        }
    }

    async fn time_out(&self, job: &ActiveJob) {
        let err = CoreError::Timeout(format!(
            "Prediction did not finish within {:?}",
            self.config.max_wait
        ));
        tracing::warn!(job_id = %job.job_id, batch_id = job.batch_id, "Prediction timed out");
        if let Err(e) = self.predictor.cancel(&job.job_id).await {
            tracing::warn!(job_id = %job.job_id, error = %e, "Failed to cancel timed out prediction");
        }
        self.finish(job, JobUpdate::failed(JobStatus::TimedOut, err.to_string()))
            .await;
    }

    /// Record a poll loop's terminal outcome if it still owns the job.
    async fn finish(&self, job: &ActiveJob, update: JobUpdate) {
        if self.active.remove(&job.job_id).await.is_none() {
            tracing::debug!(job_id = %job.job_id, "Job already claimed by cancellation");
            return;
        }
        if let Err(e) = self.store.update_job(job.record_id, &update).await {
            tracing::error!(job_id = %job.job_id, error = %e, "Failed to record job outcome");
        }

        tracing::info!(
            batch_id = job.batch_id,
            image_index = job.image_index,
            job_id = %job.job_id,
            status = %update.status,
            "Prediction finished",
        );
        self.events.publish(
            GenerationEvent::new(EVENT_JOB_FINISHED, job.batch_id)
                .with_job(Some(&job.job_id), job.image_index)
                .with_payload(serde_json::json!({
                    "status": update.status,
                    "error": update.error_message,
                    "asset_id": update.asset_id,
                })),
        );

        self.notify_terminal(job.batch_id).await;
    }

    async fn cancel_job(&self, job: &ActiveJob) {
        job.cancel.cancel();
        if let Err(e) = self.predictor.cancel(&job.job_id).await {
            tracing::warn!(job_id = %job.job_id, error = %e, "Provider cancel failed");
        }
        let update = JobUpdate::failed(JobStatus::Canceled, CANCELED_MESSAGE);
        if let Err(e) = self.store.update_job(job.record_id, &update).await {
            tracing::error!(job_id = %job.job_id, error = %e, "Failed to record cancellation");
        }
        self.events.publish(
            GenerationEvent::new(EVENT_JOB_FINISHED, job.batch_id)
                .with_job(Some(&job.job_id), job.image_index)
                .with_payload(serde_json::json!({
                    "status": JobStatus::Canceled,
                    "error": CANCELED_MESSAGE,
                })),
        );
    }

    /// Whether `cancel_batch` stopped this batch's fan-out.
    async fn fan_out_canceled(&self, batch_id: DbId) -> bool {
        self.submitting
            .lock()
            .await
            .get(&batch_id)
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// `false` once the batch was cancelled or otherwise finished.
    async fn batch_is_open(&self, batch_id: DbId) -> bool {
        match self.store.get_batch(batch_id).await {
            Ok(Some(batch)) => !batch.status.is_terminal(),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(batch_id, error = %e, "Failed to re-read batch during fan-out");
                true
            }
        }
    }

    async fn notify_terminal(&self, batch_id: DbId) {
        if self.submitting.lock().await.contains_key(&batch_id) {
            return;
        }
        if let Err(e) = self.aggregator.on_job_terminal(batch_id).await {
            tracing::error!(batch_id, error = %e, code = e.code(), "Batch aggregation failed");
        }
    }

    /// Fail a batch that could not be started. Terminal batches are left
    /// unchanged.
    async fn fail_batch(&self, batch_id: DbId, err: &CoreError) {
        let message = err.to_string();
        match self
            .store
            .finalize_batch(batch_id, BatchStatus::Failed, Some(&message))
            .await
        {
            Ok(true) => {
                tracing::warn!(batch_id, error = %message, "Batch failed before start");
                self.events.publish(
                    GenerationEvent::new(EVENT_BATCH_FAILED, batch_id)
                        .with_payload(serde_json::json!({ "error": message })),
                );
            }
            Ok(false) => {}
            Err(e) => tracing::error!(batch_id, error = %e, "Failed to mark batch failed"),
        }
    }
}

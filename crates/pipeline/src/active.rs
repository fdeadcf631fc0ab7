//! In-memory registry of jobs that still have a live poll loop.
//!
//! Removing a job from the registry is the claim on its terminal write: a
//! poll loop only records an outcome for a job it removed itself, and
//! cancellation drains a batch's entries before writing `canceled`.

use std::collections::HashMap;

use imagegen_core::generation::JobStatus;
use imagegen_core::types::{DbId, Timestamp};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ActiveJob {
    /// Provider prediction id.
    pub job_id: String,
    /// Row id of the persisted job.
    pub record_id: DbId,
    pub batch_id: DbId,
    pub image_index: u32,
    pub status: JobStatus,
    pub started_at: Timestamp,
    /// Stops this job's poll loop.
    pub cancel: CancellationToken,
}

/// Read-only view of an [`ActiveJob`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveJobSnapshot {
    pub job_id: String,
    pub batch_id: DbId,
    pub image_index: u32,
    pub status: JobStatus,
    pub started_at: Timestamp,
}

impl From<&ActiveJob> for ActiveJobSnapshot {
    fn from(job: &ActiveJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            batch_id: job.batch_id,
            image_index: job.image_index,
            status: job.status,
            started_at: job.started_at,
        }
    }
}

#[derive(Debug, Default)]
pub struct ActiveJobs {
    jobs: RwLock<HashMap<String, ActiveJob>>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: ActiveJob) {
        self.jobs.write().await.insert(job.job_id.clone(), job);
    }

    pub async fn contains(&self, job_id: &str) -> bool {
        self.jobs.read().await.contains_key(job_id)
    }

    /// Record a non-terminal status. Returns the previous status, or `None`
    /// if the job is no longer registered.
    pub async fn set_status(&self, job_id: &str, status: JobStatus) -> Option<JobStatus> {
        self.jobs
            .write()
            .await
            .get_mut(job_id)
            .map(|job| std::mem::replace(&mut job.status, status))
    }

    /// Claim a job. Only the caller that gets `Some` may write its outcome.
    pub async fn remove(&self, job_id: &str) -> Option<ActiveJob> {
        self.jobs.write().await.remove(job_id)
    }

    /// Claim every job of a batch at once.
    pub async fn take_batch(&self, batch_id: DbId) -> Vec<ActiveJob> {
        let mut jobs = self.jobs.write().await;
        let ids: Vec<String> = jobs
            .values()
            .filter(|job| job.batch_id == batch_id)
            .map(|job| job.job_id.clone())
            .collect();
        let mut taken: Vec<ActiveJob> = ids.iter().filter_map(|id| jobs.remove(id)).collect();
        taken.sort_by_key(|job| job.image_index);
        taken
    }

    pub async fn snapshot_batch(&self, batch_id: DbId) -> Vec<ActiveJobSnapshot> {
        let jobs = self.jobs.read().await;
        let mut snapshot: Vec<ActiveJobSnapshot> = jobs
            .values()
            .filter(|job| job.batch_id == batch_id)
            .map(ActiveJobSnapshot::from)
            .collect();
        snapshot.sort_by_key(|job| job.image_index);
        snapshot
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn job(job_id: &str, batch_id: DbId, image_index: u32) -> ActiveJob {
        ActiveJob {
            job_id: job_id.to_string(),
            record_id: image_index as DbId + 1,
            batch_id,
            image_index,
            status: JobStatus::Starting,
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn remove_claims_a_job_once() {
        let active = ActiveJobs::new();
        active.insert(job("p1", 1, 0)).await;

        assert!(active.remove("p1").await.is_some());
        assert!(active.remove("p1").await.is_none());
        assert!(active.is_empty().await);
    }

    #[tokio::test]
    async fn take_batch_leaves_other_batches() {
        let active = ActiveJobs::new();
        active.insert(job("a1", 1, 1)).await;
        active.insert(job("a0", 1, 0)).await;
        active.insert(job("b0", 2, 0)).await;

        let taken = active.take_batch(1).await;
        let ids: Vec<_> = taken.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(ids, vec!["a0", "a1"]);
        assert_eq!(active.len().await, 1);
        assert!(active.contains("b0").await);
    }

    #[tokio::test]
    async fn set_status_reports_previous_value() {
        let active = ActiveJobs::new();
        active.insert(job("p1", 1, 0)).await;

        assert_eq!(
            active.set_status("p1", JobStatus::Processing).await,
            Some(JobStatus::Starting)
        );
        assert_eq!(active.set_status("gone", JobStatus::Processing).await, None);
        assert_eq!(
            active.snapshot_batch(1).await[0].status,
            JobStatus::Processing
        );
    }
}

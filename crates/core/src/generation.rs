//! Batch and job lifecycle: status enums, defaults, request validation and
//! the aggregation rule that derives a batch status from its jobs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Interval between two status checks of the same job.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
/// Wall-clock budget for a single job, measured from its submission.
pub const DEFAULT_MAX_WAIT_SECS: u64 = 300;
/// Upper bound on images requested in one batch.
pub const DEFAULT_MAX_OUTPUTS: u32 = 8;
/// Outputs requested from the provider per job.
pub const OUTPUTS_PER_JOB: u32 = 1;
/// Longest accepted prompt, in characters.
pub const MAX_PROMPT_CHARS: usize = 4_000;
/// Most reference images accepted for one batch.
pub const MAX_REFERENCE_IMAGES: usize = 8;

/// Batch error message when no job produced an image.
pub const ALL_FAILED_MESSAGE: &str = "All image generations failed";
/// Batch error message after a user cancellation.
pub const CANCELED_MESSAGE: &str = "Generation canceled by user";

// ---------------------------------------------------------------------------
// Batch status
// ---------------------------------------------------------------------------

/// Lifecycle of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub const ALL: [BatchStatus; 4] = [
        BatchStatus::Pending,
        BatchStatus::Processing,
        BatchStatus::Completed,
        BatchStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BatchStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown batch status '{s}'")))
    }
}

impl TryFrom<String> for BatchStatus {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ---------------------------------------------------------------------------
// Job status
// ---------------------------------------------------------------------------

/// Lifecycle of one generation job.
///
/// The first six values mirror the provider's own vocabulary; `TimedOut`
/// is assigned locally when the poll budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    Aborted,
    TimedOut,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Starting,
        JobStatus::Processing,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::Canceled,
        JobStatus::Aborted,
        JobStatus::TimedOut,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Starting => "starting",
            JobStatus::Processing => "processing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
            JobStatus::Aborted => "aborted",
            JobStatus::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Starting | JobStatus::Processing)
    }

    /// Terminal statuses that count against the batch.
    pub fn is_failure(self) -> bool {
        self.is_terminal() && self != JobStatus::Succeeded
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown job status '{s}'")))
    }
}

impl TryFrom<String> for JobStatus {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Per-batch counts of job outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobTally {
    pub succeeded: u32,
    pub failed: u32,
    pub active: u32,
}

impl JobTally {
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = JobStatus>,
    {
        statuses
            .into_iter()
            .fold(JobTally::default(), |mut tally, status| {
                if status == JobStatus::Succeeded {
                    tally.succeeded += 1;
                } else if status.is_failure() {
                    tally.failed += 1;
                } else {
                    tally.active += 1;
                }
                tally
            })
    }

    pub fn total(&self) -> u32 {
        self.succeeded + self.failed + self.active
    }
}

/// What the aggregator should do with a batch given its jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// At least one job is still running; leave the batch alone.
    InProgress,
    /// Every job is terminal and at least one produced an image.
    Completed,
    /// Every job is terminal and none produced an image.
    Failed { message: String },
}

impl BatchOutcome {
    pub fn status(&self) -> Option<BatchStatus> {
        match self {
            BatchOutcome::InProgress => None,
            BatchOutcome::Completed => Some(BatchStatus::Completed),
            BatchOutcome::Failed { .. } => Some(BatchStatus::Failed),
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            BatchOutcome::Failed { message } => Some(message),
            _ => None,
        }
    }
}

/// Derive the batch outcome from the multiset of its job statuses.
///
/// Partial failure is tolerated: one success is enough for `Completed`.
/// A batch without any recorded job fails, since nothing can produce an
/// image for it anymore.
pub fn aggregate(tally: &JobTally) -> BatchOutcome {
    if tally.active > 0 {
        BatchOutcome::InProgress
    } else if tally.succeeded > 0 {
        BatchOutcome::Completed
    } else {
        BatchOutcome::Failed {
            message: ALL_FAILED_MESSAGE.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate the parameters of a batch before any job is submitted.
pub fn validate_batch_request(
    prompt: &str,
    requested_count: u32,
    max_outputs: u32,
) -> Result<(), CoreError> {
    if prompt.trim().is_empty() {
        return Err(CoreError::Validation("Prompt must not be empty".to_string()));
    }
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(CoreError::Validation(format!(
            "Prompt must be at most {MAX_PROMPT_CHARS} characters"
        )));
    }
    validate_requested_count(requested_count, max_outputs)
}

/// Validate that the requested output count is within `1..=max_outputs`.
pub fn validate_requested_count(requested_count: u32, max_outputs: u32) -> Result<(), CoreError> {
    if requested_count == 0 || requested_count > max_outputs {
        return Err(CoreError::Validation(format!(
            "Requested image count must be between 1 and {max_outputs}, got {requested_count}"
        )));
    }
    Ok(())
}

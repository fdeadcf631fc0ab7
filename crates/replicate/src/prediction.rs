//! Prediction (one generation job) contract.
//!
//! Provider payloads vary in shape; everything is normalized here so the
//! engine only ever sees a [`PredictionState`] with at most one output URL.

use async_trait::async_trait;
use imagegen_core::generation::JobStatus;
use serde::Deserialize;

use crate::error::ClientError;

/// Status vocabulary of the prediction service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    Aborted,
}

impl From<PredictionStatus> for JobStatus {
    fn from(status: PredictionStatus) -> Self {
        match status {
            PredictionStatus::Starting => JobStatus::Starting,
            PredictionStatus::Processing => JobStatus::Processing,
            PredictionStatus::Succeeded => JobStatus::Succeeded,
            PredictionStatus::Failed => JobStatus::Failed,
            PredictionStatus::Canceled => JobStatus::Canceled,
            PredictionStatus::Aborted => JobStatus::Aborted,
        }
    }
}

/// Normalized result of a status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionState {
    pub status: PredictionStatus,
    pub output_url: Option<String>,
    pub error: Option<String>,
}

impl PredictionState {
    pub fn new(status: PredictionStatus) -> Self {
        Self {
            status,
            output_url: None,
            error: None,
        }
    }
}

/// Parameters of one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionRequest {
    pub prompt: String,
    pub output_count: u32,
    pub reference_urls: Vec<String>,
}

/// Submit, poll and cancel single generation jobs.
#[async_trait]
pub trait PredictionClient: Send + Sync {
    /// Submit a job and return the provider's job id.
    async fn submit(&self, request: &PredictionRequest) -> Result<String, ClientError>;

    async fn get_status(&self, job_id: &str) -> Result<PredictionState, ClientError>;

    async fn cancel(&self, job_id: &str) -> Result<(), ClientError>;
}

/// Reduce a raw `output` value to a single URL.
///
/// Accepts `null`, a string, or an array holding exactly one string.
/// Anything else is rejected instead of guessed at.
pub fn normalize_output(output: Option<&serde_json::Value>) -> Result<Option<String>, ClientError> {
    use serde_json::Value;

    match output {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(url)) => Ok(Some(url.clone())),
        Some(Value::Array(items)) => match items.as_slice() {
            [] => Ok(None),
            [Value::String(url)] => Ok(Some(url.clone())),
            _ => Err(ClientError::UnexpectedResponse(format!(
                "expected exactly one output URL, got {} items",
                items.len()
            ))),
        },
        Some(other) => Err(ClientError::UnexpectedResponse(format!(
            "unsupported output shape: {other}"
        ))),
    }
}

/// Render a provider `error` field as text; it may be a string or an object.
pub fn normalize_error(error: Option<&serde_json::Value>) -> Option<String> {
    match error? {
        serde_json::Value::Null => None,
        serde_json::Value::String(message) => Some(message.clone()),
        other => Some(other.to_string()),
    }
}

//! REST client for the provider's predictions and files endpoints.
//!
//! Implements [`PredictionClient`] and [`BlobUploadClient`] on top of
//! [`reqwest`]. All payload normalization happens here.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use imagegen_core::reference::UploadValidityPolicy;
use imagegen_core::types::Timestamp;
use serde::Deserialize;

use crate::config::ReplicateConfig;
use crate::error::ClientError;
use crate::prediction::{
    normalize_error, normalize_output, PredictionClient, PredictionRequest, PredictionState,
    PredictionStatus,
};
use crate::upload::{BlobUploadClient, UploadMetadata, UploadedFile};

/// HTTP client for one provider account and model.
pub struct ReplicateApi {
    client: reqwest::Client,
    config: ReplicateConfig,
    /// Supplies the expiry of uploads whose response omits `expires_at`.
    upload_policy: UploadValidityPolicy,
}

/// Prediction payload as returned by create and get.
#[derive(Debug, Deserialize)]
struct PredictionResponse {
    id: String,
    status: PredictionStatus,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// File payload returned by `POST /files`.
#[derive(Debug, Deserialize)]
struct FileResponse {
    id: String,
    #[serde(default)]
    created_at: Option<Timestamp>,
    #[serde(default)]
    expires_at: Option<Timestamp>,
}

impl ReplicateApi {
    pub fn new(config: ReplicateConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: ReplicateConfig) -> Self {
        Self {
            client,
            config,
            upload_policy: UploadValidityPolicy::default(),
        }
    }

    /// Use the engine's validity window for uploads without an expiry.
    pub fn with_upload_policy(mut self, policy: UploadValidityPolicy) -> Self {
        self.upload_policy = policy;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url, path)
    }

    fn upload_expiry(&self, file: &FileResponse) -> Timestamp {
        file.expires_at.unwrap_or_else(|| {
            self.upload_policy
                .expiry_for(file.created_at.unwrap_or_else(Utc::now))
        })
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, or turn the status
    /// and body into a [`ClientError::Api`].
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClientError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

/// Build the JSON body of a prediction submission.
pub fn prediction_body(request: &PredictionRequest, reference_input: &str) -> serde_json::Value {
    let mut input = serde_json::json!({
        "prompt": request.prompt,
        "num_outputs": request.output_count,
    });
    if !request.reference_urls.is_empty() {
        input[reference_input] = serde_json::json!(request.reference_urls);
    }
    serde_json::json!({ "input": input })
}

#[async_trait]
impl PredictionClient for ReplicateApi {
    async fn submit(&self, request: &PredictionRequest) -> Result<String, ClientError> {
        let body = prediction_body(request, &self.config.reference_input);
        let response = self
            .client
            .post(self.url(&format!("models/{}/predictions", self.config.model)))
            .bearer_auth(&self.config.api_token)
            .json(&body)
            .send()
            .await?;

        let prediction: PredictionResponse = Self::parse_response(response).await?;
        tracing::debug!(
            job_id = %prediction.id,
            status = ?prediction.status,
            "Prediction created",
        );
        Ok(prediction.id)
    }

    async fn get_status(&self, job_id: &str) -> Result<PredictionState, ClientError> {
        let response = self
            .client
            .get(self.url(&format!("predictions/{job_id}")))
            .bearer_auth(&self.config.api_token)
            .send()
            .await?;

        let prediction: PredictionResponse = Self::parse_response(response).await?;
        Ok(PredictionState {
            status: prediction.status,
            output_url: normalize_output(prediction.output.as_ref())?,
            error: normalize_error(prediction.error.as_ref()),
        })
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url(&format!("predictions/{job_id}/cancel")))
            .bearer_auth(&self.config.api_token)
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl BlobUploadClient for ReplicateApi {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &UploadMetadata,
    ) -> Result<UploadedFile, ClientError> {
        let size = bytes.len();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(metadata.filename.clone())
            .mime_str(content_type)?;
        let form = reqwest::multipart::Form::new()
            .part("content", part)
            .text("filename", metadata.filename.clone())
            .text("type", content_type.to_string())
            .text(
                "metadata",
                serde_json::json!({ "content_hash": metadata.content_hash }).to_string(),
            );

        let response = self
            .client
            .post(self.url("files"))
            .bearer_auth(&self.config.api_token)
            .multipart(form)
            .send()
            .await?;

        let file: FileResponse = Self::parse_response(response).await?;
        let expires_at = self.upload_expiry(&file);

        tracing::debug!(
            external_id = %file.id,
            size,
            %expires_at,
            "Reference image uploaded",
        );

        Ok(UploadedFile {
            external_id: file.id,
            expires_at,
        })
    }

    fn file_url(&self, external_id: &str) -> String {
        self.url(&format!("files/{external_id}"))
    }
}

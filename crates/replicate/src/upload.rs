//! Blob staging contract for reference images.

use async_trait::async_trait;
use imagegen_core::types::Timestamp;

use crate::error::ClientError;

/// Descriptive data sent alongside uploaded bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadMetadata {
    pub filename: String,
    pub content_hash: Option<String>,
}

/// The provider-side handle for an uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub external_id: String,
    pub expires_at: Timestamp,
}

/// Upload bytes to the provider's file host.
#[async_trait]
pub trait BlobUploadClient: Send + Sync {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &UploadMetadata,
    ) -> Result<UploadedFile, ClientError>;

    /// URL under which a prediction can read the uploaded file.
    fn file_url(&self, external_id: &str) -> String;
}

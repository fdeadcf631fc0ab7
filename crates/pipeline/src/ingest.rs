//! Ingestion of generated outputs into local asset storage.

use std::path::PathBuf;

use async_trait::async_trait;
use imagegen_core::error::CoreError;
use imagegen_core::types::DbId;

/// Turns a provider output URL into a stored asset.
#[async_trait]
pub trait ImageIngestor: Send + Sync {
    /// Download and persist the image at `output_url`, returning the new
    /// asset id.
    async fn ingest(&self, output_url: &str, batch_id: DbId) -> Result<String, CoreError>;
}

/// Stores outputs as `<output_dir>/<batch_id>/<asset_id>.<ext>`.
pub struct FileSystemIngestor {
    client: reqwest::Client,
    output_dir: PathBuf,
}

impl FileSystemIngestor {
    pub fn new(client: reqwest::Client, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            output_dir: output_dir.into(),
        }
    }

    async fn download(&self, output_url: &str) -> Result<Vec<u8>, CoreError> {
        let response = self
            .client
            .get(output_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CoreError::Storage(format!("Failed to download output: {e}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CoreError::Storage(format!("Failed to read output body: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageIngestor for FileSystemIngestor {
    async fn ingest(&self, output_url: &str, batch_id: DbId) -> Result<String, CoreError> {
        let bytes = self.download(output_url).await?;
        if bytes.is_empty() {
            return Err(CoreError::Storage(format!("Output at {output_url} is empty")));
        }

        let asset_id = uuid::Uuid::new_v4().to_string();
        let dir = self.output_dir.join(batch_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CoreError::Storage(format!("Failed to create {}: {e}", dir.display())))?;

        let path = dir.join(format!("{asset_id}.{}", extension_for(&bytes)));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| CoreError::Storage(format!("Failed to write {}: {e}", path.display())))?;

        tracing::info!(
            batch_id,
            asset_id = %asset_id,
            size_bytes = bytes.len(),
            path = %path.display(),
            "Ingested generated image",
        );
        Ok(asset_id)
    }
}

/// File extension sniffed from the image magic bytes, `bin` if unknown.
pub fn extension_for(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_png_and_jpeg() {
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
        assert_eq!(extension_for(png), "png");
        assert_eq!(extension_for(&jpeg), "jpg");
    }

    #[test]
    fn unknown_bytes_fall_back_to_bin() {
        assert_eq!(extension_for(b"not an image"), "bin");
    }
}

//! Content-addressed storage for reference image bytes.
//!
//! Bytes are kept locally so a provider-side copy can be re-uploaded after
//! it expires. Blobs are keyed by their sha256 content hash.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use imagegen_core::error::CoreError;
use imagegen_core::hashing::is_content_hash;
use tokio::sync::RwLock;

#[async_trait]
pub trait ReferenceBlobStore: Send + Sync {
    /// Store `bytes` under `content_hash`. Storing an existing hash is a no-op.
    async fn put(&self, content_hash: &str, bytes: &[u8]) -> Result<(), CoreError>;

    /// Load the bytes for `content_hash`, or `None` if they were never
    /// stored or have been removed.
    async fn get(&self, content_hash: &str) -> Result<Option<Vec<u8>>, CoreError>;
}

fn check_hash(content_hash: &str) -> Result<(), CoreError> {
    if is_content_hash(content_hash) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "'{content_hash}' is not a sha256 content hash"
        )))
    }
}

// ---------------------------------------------------------------------------
// Local filesystem
// ---------------------------------------------------------------------------

/// Stores blobs under `<root>/<first two hash chars>/<hash>`.
#[derive(Debug, Clone)]
pub struct LocalReferenceStore {
    root: PathBuf,
}

impl LocalReferenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, content_hash: &str) -> PathBuf {
        self.root.join(&content_hash[..2]).join(content_hash)
    }
}

#[async_trait]
impl ReferenceBlobStore for LocalReferenceStore {
    async fn put(&self, content_hash: &str, bytes: &[u8]) -> Result<(), CoreError> {
        check_hash(content_hash)?;
        let path = self.path_for(content_hash);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        let dir = path.parent().unwrap_or(&self.root);
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| CoreError::Storage(format!("Failed to create {}: {e}", dir.display())))?;

        // Write-then-rename so readers never observe a partial blob.
        let tmp = path.with_extension("partial");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| CoreError::Storage(format!("Failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CoreError::Storage(format!("Failed to store {}: {e}", path.display())))?;

        tracing::debug!(content_hash, path = %path.display(), "Stored reference blob");
        Ok(())
    }

    async fn get(&self, content_hash: &str) -> Result<Option<Vec<u8>>, CoreError> {
        check_hash(content_hash)?;
        let path = self.path_for(content_hash);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::Storage(format!(
                "Failed to read {}: {e}",
                path.display()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryReferenceStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a blob, as if the local copy had been lost.
    pub async fn remove(&self, content_hash: &str) -> bool {
        self.blobs.write().await.remove(content_hash).is_some()
    }
}

#[async_trait]
impl ReferenceBlobStore for MemoryReferenceStore {
    async fn put(&self, content_hash: &str, bytes: &[u8]) -> Result<(), CoreError> {
        check_hash(content_hash)?;
        self.blobs
            .write()
            .await
            .entry(content_hash.to_string())
            .or_insert_with(|| bytes.to_vec());
        Ok(())
    }

    async fn get(&self, content_hash: &str) -> Result<Option<Vec<u8>>, CoreError> {
        check_hash(content_hash)?;
        Ok(self.blobs.read().await.get(content_hash).cloned())
    }
}

//! Reference image cache.
//!
//! Uploads are deduplicated by sha256 content hash: the same bytes always
//! map to one [`ReferenceImage`] record. The provider only keeps an
//! uploaded file for a limited window, so every lookup checks the current
//! [`ExternalUpload`] against the [`UploadValidityPolicy`] and re-uploads
//! from local bytes when the copy is stale. Refreshes are single-flight per
//! content hash.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use imagegen_core::error::CoreError;
use imagegen_core::hashing::content_hash;
use imagegen_core::job_events::EVENT_REFERENCE_REFRESHED;
use imagegen_core::reference::UploadValidityPolicy;
use imagegen_core::types::DbId;
use imagegen_db::models::reference_image::{ExternalUpload, NewReferenceImage, ReferenceImage};
use imagegen_events::{EventBus, GenerationEvent};
use imagegen_replicate::{BlobUploadClient, UploadMetadata};
use tokio::sync::Mutex;

use crate::blobs::ReferenceBlobStore;
use crate::store::GenerationStore;

/// A reference image together with a provider URL that is usable now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
    pub reference_image_id: DbId,
    pub external_url: String,
    /// `true` when this call uploaded a fresh provider copy.
    pub was_refreshed: bool,
}

/// Why a reference image was left out of [`ReferenceImageCache::ensure_valid`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceWarning {
    #[error("Reference image {0} does not exist")]
    Missing(DbId),

    #[error("Reference image {0} has no stored bytes to re-upload")]
    BytesUnavailable(DbId),

    #[error("Reference image {reference_image_id} could not be refreshed: {reason}")]
    RefreshFailed {
        reference_image_id: DbId,
        reason: String,
    },
}

/// Outcome of [`ReferenceImageCache::ensure_valid`].
#[derive(Debug, Clone, Default)]
pub struct EnsureValidReport {
    /// Usable references, in input order.
    pub resolved: Vec<ResolvedReference>,
    pub warnings: Vec<ReferenceWarning>,
}

impl EnsureValidReport {
    pub fn reference_image_ids(&self) -> Vec<DbId> {
        self.resolved.iter().map(|r| r.reference_image_id).collect()
    }

    pub fn urls(&self) -> Vec<String> {
        self.resolved.iter().map(|r| r.external_url.clone()).collect()
    }
}

enum RefreshError {
    BytesUnavailable(DbId),
    Core(CoreError),
}

impl From<CoreError> for RefreshError {
    fn from(err: CoreError) -> Self {
        RefreshError::Core(err)
    }
}

pub struct ReferenceImageCache {
    store: Arc<dyn GenerationStore>,
    blobs: Arc<dyn ReferenceBlobStore>,
    uploader: Arc<dyn BlobUploadClient>,
    events: Arc<EventBus>,
    policy: UploadValidityPolicy,
    /// One lock per content hash with a refresh in progress.
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ReferenceImageCache {
    pub fn new(
        store: Arc<dyn GenerationStore>,
        blobs: Arc<dyn ReferenceBlobStore>,
        uploader: Arc<dyn BlobUploadClient>,
        events: Arc<EventBus>,
        policy: UploadValidityPolicy,
    ) -> Self {
        Self {
            store,
            blobs,
            uploader,
            events,
            policy,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Register uploaded bytes and return a currently valid provider URL.
    ///
    /// Identical bytes resolve to the same reference image. An existing
    /// provider copy is reused while it is outside the grace margin.
    /// Upload failures are returned, not retried.
    pub async fn resolve(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
    ) -> Result<ResolvedReference, CoreError> {
        if bytes.is_empty() {
            return Err(CoreError::Validation(format!(
                "Reference image '{filename}' is empty"
            )));
        }

        let hash = content_hash(&bytes);
        let (image, created) = self
            .store
            .insert_or_get_reference_image(&NewReferenceImage {
                content_hash: hash.clone(),
                filename: filename.to_string(),
                content_type: content_type.to_string(),
                size_bytes: bytes.len() as i64,
            })
            .await?;
        if created {
            tracing::info!(
                reference_image_id = image.id,
                content_hash = %hash,
                size_bytes = image.size_bytes,
                "Registered reference image",
            );
        }

        self.blobs.put(&hash, &bytes).await?;

        self.refresh_if_stale(&image, Some(bytes))
            .await
            .map_err(|e| match e {
                RefreshError::Core(err) => err,
                RefreshError::BytesUnavailable(id) => CoreError::NotFound {
                    entity: "reference image bytes",
                    id,
                },
            })
    }

    /// Make sure each listed reference image has a valid provider copy.
    ///
    /// Images that cannot be made valid are skipped with a warning; the
    /// remaining ones are returned in input order. Duplicate ids are
    /// collapsed.
    pub async fn ensure_valid(&self, reference_image_ids: &[DbId]) -> EnsureValidReport {
        let mut report = EnsureValidReport::default();
        let mut seen = Vec::with_capacity(reference_image_ids.len());

        for &id in reference_image_ids {
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);

            match self.ensure_one(id).await {
                Ok(resolved) => report.resolved.push(resolved),
                Err(warning) => {
                    tracing::warn!(reference_image_id = id, warning = %warning, "Skipping reference image");
                    report.warnings.push(warning);
                }
            }
        }
        report
    }

    async fn ensure_one(&self, id: DbId) -> Result<ResolvedReference, ReferenceWarning> {
        let image = match self.store.get_reference_image(id).await {
            Ok(Some(image)) => image,
            Ok(None) => return Err(ReferenceWarning::Missing(id)),
            Err(e) => {
                return Err(ReferenceWarning::RefreshFailed {
                    reference_image_id: id,
                    reason: CoreError::from(e).to_string(),
                })
            }
        };

        self.refresh_if_stale(&image, None)
            .await
            .map_err(|e| match e {
                RefreshError::BytesUnavailable(id) => ReferenceWarning::BytesUnavailable(id),
                RefreshError::Core(err) => ReferenceWarning::RefreshFailed {
                    reference_image_id: id,
                    reason: err.to_string(),
                },
            })
    }

    /// Return the current provider URL, uploading a new copy first if the
    /// current one is missing or within the grace margin.
    async fn refresh_if_stale(
        &self,
        image: &ReferenceImage,
        bytes: Option<Vec<u8>>,
    ) -> Result<ResolvedReference, RefreshError> {
        if let Some(url) = self.valid_url(image.id).await? {
            return Ok(ResolvedReference {
                reference_image_id: image.id,
                external_url: url,
                was_refreshed: false,
            });
        }

        let lock = self.upload_lock(&image.content_hash).await;
        let result = {
            let _guard = lock.lock().await;
            self.refresh_locked(image, bytes).await
        };
        self.release_upload_lock(&image.content_hash, lock).await;
        result
    }

    async fn refresh_locked(
        &self,
        image: &ReferenceImage,
        bytes: Option<Vec<u8>>,
    ) -> Result<ResolvedReference, RefreshError> {
        // Another caller may have uploaded while we waited for the lock.
        if let Some(url) = self.valid_url(image.id).await? {
            return Ok(ResolvedReference {
                reference_image_id: image.id,
                external_url: url,
                was_refreshed: false,
            });
        }

        let bytes = match bytes {
            Some(bytes) => bytes,
            None => self
                .blobs
                .get(&image.content_hash)
                .await?
                .ok_or(RefreshError::BytesUnavailable(image.id))?,
        };

        let metadata = UploadMetadata {
            filename: image.filename.clone(),
            content_hash: Some(image.content_hash.clone()),
        };
        let uploaded = self
            .uploader
            .upload(bytes, &image.content_type, &metadata)
            .await
            .map_err(CoreError::from)?;

        let upload = ExternalUpload {
            reference_image_id: image.id,
            external_id: uploaded.external_id,
            expires_at: uploaded.expires_at,
            uploaded_at: Utc::now(),
        };
        self.store
            .record_upload(&upload)
            .await
            .map_err(CoreError::from)?;

        tracing::info!(
            reference_image_id = image.id,
            external_id = %upload.external_id,
            expires_at = %upload.expires_at,
            "Uploaded reference image to provider",
        );
        self.events.publish(
            GenerationEvent::new(EVENT_REFERENCE_REFRESHED, image.id).with_payload(
                serde_json::json!({
                    "external_id": upload.external_id,
                    "expires_at": upload.expires_at,
                }),
            ),
        );

        Ok(ResolvedReference {
            reference_image_id: image.id,
            external_url: self.uploader.file_url(&upload.external_id),
            was_refreshed: true,
        })
    }

    async fn valid_url(&self, reference_image_id: DbId) -> Result<Option<String>, CoreError> {
        let upload = self.store.current_upload(reference_image_id).await?;
        Ok(upload
            .filter(|u| self.policy.is_valid(u.expires_at, Utc::now()))
            .map(|u| self.uploader.file_url(&u.external_id)))
    }

    async fn upload_lock(&self, content_hash: &str) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().await;
        Arc::clone(in_flight.entry(content_hash.to_string()).or_default())
    }

    async fn release_upload_lock(&self, content_hash: &str, lock: Arc<Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().await;
        // The map and this handle are the only owners once nobody waits.
        if Arc::strong_count(&lock) == 2 {
            in_flight.remove(content_hash);
        }
    }
}

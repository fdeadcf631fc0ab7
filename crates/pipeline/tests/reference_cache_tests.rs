mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use common::{fast_config, image_bytes, FakePredictor, FakeUploader, Harness, Script};
use futures::future::join_all;
use imagegen_core::error::CoreError;
use imagegen_core::hashing::content_hash;
use imagegen_core::types::DbId;
use imagegen_db::models::reference_image::ExternalUpload;
use imagegen_pipeline::reference_cache::ReferenceWarning;
use imagegen_pipeline::GenerationStore;

fn harness() -> Harness {
    Harness::new(FakePredictor::always(Script::Succeed { after_polls: 1 }))
}

/// Pretend the current upload of `id` expires `hours` from now.
async fn set_remaining_validity(harness: &Harness, id: DbId, hours: i64) {
    let now = Utc::now();
    harness
        .store
        .record_upload(&ExternalUpload {
            reference_image_id: id,
            external_id: "file-old".to_string(),
            expires_at: now + chrono::Duration::hours(hours),
            uploaded_at: now - chrono::Duration::hours(24 - hours),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn identical_bytes_share_one_reference_image() {
    let harness = harness();

    let first = harness.cache.resolve(image_bytes(1), "a.png", "image/png").await.unwrap();
    let second = harness.cache.resolve(image_bytes(1), "copy.png", "image/png").await.unwrap();

    assert_eq!(first.reference_image_id, second.reference_image_id);
    assert!(first.was_refreshed);
    assert!(!second.was_refreshed);
    assert_eq!(first.external_url, second.external_url);
    assert_eq!(harness.uploader.uploads(), 1);

    let stored = harness
        .store
        .get_reference_image(first.reference_image_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.content_hash, content_hash(&image_bytes(1)));
    assert_eq!(stored.filename, "a.png");
}

#[tokio::test]
async fn different_bytes_get_different_records() {
    let harness = harness();

    let a = harness.cache.resolve(image_bytes(1), "a.png", "image/png").await.unwrap();
    let b = harness.cache.resolve(image_bytes(2), "b.png", "image/png").await.unwrap();

    assert_ne!(a.reference_image_id, b.reference_image_id);
    assert_eq!(harness.uploader.uploads(), 2);
}

#[tokio::test]
async fn resolve_keeps_bytes_for_later_refresh() {
    let harness = harness();
    let bytes = image_bytes(3);

    harness.cache.resolve(bytes.clone(), "c.png", "image/png").await.unwrap();

    use imagegen_pipeline::blobs::ReferenceBlobStore;
    assert_eq!(
        harness.blobs.get(&content_hash(&bytes)).await.unwrap(),
        Some(bytes)
    );
}

#[tokio::test]
async fn empty_upload_is_rejected() {
    let harness = harness();
    assert_matches!(
        harness.cache.resolve(Vec::new(), "empty.png", "image/png").await,
        Err(CoreError::Validation(_))
    );
    assert_eq!(harness.uploader.uploads(), 0);
}

#[tokio::test]
async fn upload_failure_is_surfaced_not_retried() {
    let harness = harness();
    harness.uploader.set_failing(true);

    assert_matches!(
        harness.cache.resolve(image_bytes(4), "d.png", "image/png").await,
        Err(CoreError::ExternalService(_))
    );
}

// ---------------------------------------------------------------------------
// Expiry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_inside_grace_margin_is_refreshed() {
    let harness = harness();
    let resolved = harness.cache.resolve(image_bytes(5), "e.png", "image/png").await.unwrap();
    set_remaining_validity(&harness, resolved.reference_image_id, 3).await;

    let report = harness.cache.ensure_valid(&[resolved.reference_image_id]).await;

    assert!(report.warnings.is_empty());
    assert!(report.resolved[0].was_refreshed);
    assert_eq!(harness.uploader.uploads(), 2);
    let current = harness
        .store
        .current_upload(resolved.reference_image_id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(current.external_id, "file-old");
    assert!(current.expires_at > Utc::now() + chrono::Duration::hours(23));
}

#[tokio::test]
async fn upload_outside_grace_margin_is_reused() {
    let harness = harness();
    let resolved = harness.cache.resolve(image_bytes(6), "f.png", "image/png").await.unwrap();
    set_remaining_validity(&harness, resolved.reference_image_id, 5).await;

    let report = harness.cache.ensure_valid(&[resolved.reference_image_id]).await;

    assert!(!report.resolved[0].was_refreshed);
    assert!(report.resolved[0].external_url.ends_with("/files/file-old"));
    assert_eq!(harness.uploader.uploads(), 1);
}

#[tokio::test]
async fn upload_exactly_at_grace_margin_is_refreshed() {
    let harness = harness();
    let resolved = harness.cache.resolve(image_bytes(7), "g.png", "image/png").await.unwrap();
    set_remaining_validity(&harness, resolved.reference_image_id, 4).await;

    let report = harness.cache.ensure_valid(&[resolved.reference_image_id]).await;

    assert!(report.resolved[0].was_refreshed);
}

// ---------------------------------------------------------------------------
// ensure_valid degradation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unusable_references_are_skipped_with_warnings() {
    let harness = harness();
    let kept = harness.cache.resolve(image_bytes(8), "h.png", "image/png").await.unwrap();
    let lost = harness.cache.resolve(image_bytes(9), "i.png", "image/png").await.unwrap();
    set_remaining_validity(&harness, lost.reference_image_id, 1).await;
    harness.blobs.remove(&content_hash(&image_bytes(9))).await;

    let report = harness
        .cache
        .ensure_valid(&[kept.reference_image_id, 999, lost.reference_image_id])
        .await;

    assert_eq!(report.reference_image_ids(), vec![kept.reference_image_id]);
    assert_eq!(
        report.warnings,
        vec![
            ReferenceWarning::Missing(999),
            ReferenceWarning::BytesUnavailable(lost.reference_image_id),
        ]
    );
}

#[tokio::test]
async fn failed_refresh_is_a_warning() {
    let harness = harness();
    let resolved = harness.cache.resolve(image_bytes(10), "j.png", "image/png").await.unwrap();
    set_remaining_validity(&harness, resolved.reference_image_id, 2).await;
    harness.uploader.set_failing(true);

    let report = harness.cache.ensure_valid(&[resolved.reference_image_id]).await;

    assert!(report.resolved.is_empty());
    assert_matches!(
        report.warnings.as_slice(),
        [ReferenceWarning::RefreshFailed { reference_image_id, .. }]
            if *reference_image_id == resolved.reference_image_id
    );
}

#[tokio::test]
async fn duplicate_ids_are_collapsed() {
    let harness = harness();
    let resolved = harness.cache.resolve(image_bytes(11), "k.png", "image/png").await.unwrap();
    let id = resolved.reference_image_id;

    let report = harness.cache.ensure_valid(&[id, id, id]).await;

    assert_eq!(report.reference_image_ids(), vec![id]);
}

// ---------------------------------------------------------------------------
// Single flight
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_refreshes_upload_once() {
    let harness = Harness::build(
        FakePredictor::always(Script::Succeed { after_polls: 1 }),
        FakeUploader::with_delay(Duration::from_millis(50)),
        fast_config(),
    );
    let resolved = harness.cache.resolve(image_bytes(12), "l.png", "image/png").await.unwrap();
    set_remaining_validity(&harness, resolved.reference_image_id, 1).await;
    let id = resolved.reference_image_id;

    let cache = Arc::clone(&harness.cache);
    let reports = join_all((0..8).map(|_| {
        let cache = Arc::clone(&cache);
        async move { cache.ensure_valid(&[id]).await }
    }))
    .await;

    // One upload from resolve, one shared refresh.
    assert_eq!(harness.uploader.uploads(), 2);
    let urls: Vec<_> = reports.iter().map(|r| r.urls()).collect();
    assert!(urls.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(reports.iter().filter(|r| r.resolved[0].was_refreshed).count(), 1);
}

#[tokio::test]
async fn concurrent_resolves_of_new_bytes_upload_once() {
    let harness = Harness::build(
        FakePredictor::always(Script::Succeed { after_polls: 1 }),
        FakeUploader::with_delay(Duration::from_millis(50)),
        fast_config(),
    );

    let results = join_all(
        (0..4).map(|_| harness.cache.resolve(image_bytes(13), "m.png", "image/png")),
    )
    .await;

    assert_eq!(harness.uploader.uploads(), 1);
    let ids: Vec<_> = results.into_iter().map(|r| r.unwrap().reference_image_id).collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
}

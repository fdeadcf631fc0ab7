mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use common::{image_bytes, FakePredictor, Harness, Script};
use imagegen_core::error::CoreError;
use imagegen_core::generation::BatchStatus;
use imagegen_core::hashing::content_hash;
use imagegen_db::models::reference_image::ExternalUpload;
use imagegen_pipeline::reference_cache::ReferenceWarning;
use imagegen_pipeline::service::ReferenceUpload;
use imagegen_pipeline::GenerationStore;

fn upload(seed: u8) -> ReferenceUpload {
    ReferenceUpload {
        bytes: image_bytes(seed),
        filename: format!("ref-{seed}.png"),
        content_type: "image/png".to_string(),
    }
}

fn harness() -> Harness {
    Harness::new(FakePredictor::always(Script::Succeed { after_polls: 1 }))
}

#[tokio::test]
async fn submit_links_references_and_starts_batch() {
    let harness = harness();

    let batch = harness
        .service
        .submit("a cat in a spacesuit", 2, vec![upload(1), upload(2)])
        .await
        .unwrap();

    assert_eq!(batch.status, BatchStatus::Processing);
    assert_eq!(
        harness.store.batch_reference_image_ids(batch.id).await.unwrap().len(),
        2
    );
    let requests = harness.predictor.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].reference_urls.len(), 2);
    assert!(requests[0].reference_urls[0].starts_with("https://api.replicate.com/v1/files/"));

    let done = harness.wait_for_terminal(batch.id).await;
    assert_eq!(done.status, BatchStatus::Completed);
}

#[tokio::test]
async fn submit_rejects_invalid_input_before_storing() {
    let harness = harness();

    assert_matches!(
        harness.service.submit("a cat", 0, vec![]).await,
        Err(CoreError::Validation(_))
    );
    assert_matches!(
        harness.service.submit("", 1, vec![]).await,
        Err(CoreError::Validation(_))
    );
    let too_many = (0..9).map(upload).collect();
    assert_matches!(
        harness.service.submit("a cat", 1, too_many).await,
        Err(CoreError::Validation(_))
    );

    assert!(harness.store.claim_pending_batch().await.unwrap().is_none());
    assert_eq!(harness.uploader.uploads(), 0);
}

#[tokio::test]
async fn submit_records_failed_batch_when_reference_upload_fails() {
    let harness = harness();
    harness.uploader.set_failing(true);

    let err = harness
        .service
        .submit("a cat", 1, vec![upload(3)])
        .await
        .unwrap_err();

    assert_matches!(err, CoreError::ExternalService(_));
    // Id 1 went to the reference image, so the failed batch is id 2.
    let batch = harness.store.get_batch(2).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
    assert!(batch.error_message.unwrap().contains("upload unavailable"));
    assert!(harness.predictor.requests().is_empty());
}

#[tokio::test]
async fn rerun_refreshes_expired_references() {
    let harness = harness();
    let original = harness
        .service
        .submit("a castle on a hill", 1, vec![upload(4)])
        .await
        .unwrap();
    harness.wait_for_terminal(original.id).await;
    let reference_id = harness.store.batch_reference_image_ids(original.id).await.unwrap()[0];

    // The provider copy now has only an hour left.
    let now = Utc::now();
    harness
        .store
        .record_upload(&ExternalUpload {
            reference_image_id: reference_id,
            external_id: "file-stale".to_string(),
            expires_at: now + chrono::Duration::hours(1),
            uploaded_at: now - chrono::Duration::hours(23),
        })
        .await
        .unwrap();

    let outcome = harness.service.rerun(original.id, Some(3)).await.unwrap();

    assert!(outcome.warnings.is_empty());
    assert_ne!(outcome.batch.id, original.id);
    assert_eq!(outcome.batch.prompt, "a castle on a hill");
    assert_eq!(outcome.batch.requested_count, 3);
    assert_eq!(
        harness.store.batch_reference_image_ids(outcome.batch.id).await.unwrap(),
        vec![reference_id]
    );
    assert_eq!(harness.uploader.uploads(), 2);
    let last = harness.predictor.requests().pop().unwrap();
    assert!(!last.reference_urls[0].ends_with("file-stale"));

    let done = harness.wait_for_terminal(outcome.batch.id).await;
    assert_eq!(done.status, BatchStatus::Completed);
}

#[tokio::test]
async fn rerun_drops_references_without_bytes() {
    let harness = harness();
    let original = harness
        .service
        .submit("a lighthouse", 1, vec![upload(5)])
        .await
        .unwrap();
    harness.wait_for_terminal(original.id).await;
    let reference_id = harness.store.batch_reference_image_ids(original.id).await.unwrap()[0];
    let now = Utc::now();
    harness
        .store
        .record_upload(&ExternalUpload {
            reference_image_id: reference_id,
            external_id: "file-stale".to_string(),
            expires_at: now + chrono::Duration::hours(2),
            uploaded_at: now - chrono::Duration::hours(22),
        })
        .await
        .unwrap();
    harness.blobs.remove(&content_hash(&image_bytes(5))).await;

    let outcome = harness.service.rerun(original.id, None).await.unwrap();

    assert_eq!(outcome.warnings, vec![ReferenceWarning::BytesUnavailable(reference_id)]);
    assert_eq!(outcome.batch.requested_count, 1);
    assert!(harness
        .store
        .batch_reference_image_ids(outcome.batch.id)
        .await
        .unwrap()
        .is_empty());
    assert!(harness.predictor.requests().pop().unwrap().reference_urls.is_empty());
}

#[tokio::test]
async fn rerun_of_unknown_batch_is_not_found() {
    let harness = harness();
    assert_matches!(
        harness.service.rerun(77, None).await,
        Err(CoreError::NotFound { entity: "batch", id: 77 })
    );
}

//! Repository tests against a real Postgres.
//!
//! `#[sqlx::test]` creates a throwaway database per test and applies the
//! embedded migrations. Run with `DATABASE_URL` set and `--ignored`.

use chrono::{Duration, Utc};
use imagegen_core::generation::{BatchStatus, JobStatus};
use imagegen_db::models::batch::CreateBatch;
use imagegen_db::models::generation_job::{JobUpdate, NewGenerationJob};
use imagegen_db::models::reference_image::{ExternalUpload, NewReferenceImage};
use imagegen_db::repositories::{BatchRepo, ExternalUploadRepo, GenerationJobRepo, ReferenceImageRepo};
use sqlx::PgPool;

fn new_batch(count: i32) -> CreateBatch {
    CreateBatch {
        prompt: "a lighthouse at dusk".to_string(),
        requested_count: count,
        reference_image_ids: Vec::new(),
        claimed: false,
    }
}

fn new_reference(hash: &str, filename: &str) -> NewReferenceImage {
    NewReferenceImage {
        content_hash: hash.to_string(),
        filename: filename.to_string(),
        content_type: "image/png".to_string(),
        size_bytes: 128,
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn finalize_is_a_no_op_on_terminal_batches(pool: PgPool) {
    let batch = BatchRepo::create(&pool, &new_batch(2)).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Pending);
    assert!(BatchRepo::mark_processing(&pool, batch.id).await.unwrap());
    assert!(!BatchRepo::mark_processing(&pool, batch.id).await.unwrap());

    assert!(BatchRepo::finalize(&pool, batch.id, BatchStatus::Completed, None)
        .await
        .unwrap());
    assert!(!BatchRepo::finalize(&pool, batch.id, BatchStatus::Failed, Some("late"))
        .await
        .unwrap());

    let stored = BatchRepo::find_by_id(&pool, batch.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::Completed);
    assert!(stored.error_message.is_none());
    assert!(stored.completed_at.is_some());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn duplicate_image_index_is_rejected(pool: PgPool) {
    let batch = BatchRepo::create(&pool, &new_batch(1)).await.unwrap();
    let job = NewGenerationJob {
        batch_id: batch.id,
        image_index: 0,
        external_id: Some("pred-1".to_string()),
        status: JobStatus::Starting,
        error_message: None,
    };
    GenerationJobRepo::create(&pool, &job).await.unwrap();

    let duplicate = NewGenerationJob {
        external_id: Some("pred-2".to_string()),
        ..job
    };
    assert!(GenerationJobRepo::create(&pool, &duplicate).await.is_err());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn job_update_sets_completion(pool: PgPool) {
    let batch = BatchRepo::create(&pool, &new_batch(1)).await.unwrap();
    let job = GenerationJobRepo::create(
        &pool,
        &NewGenerationJob {
            batch_id: batch.id,
            image_index: 0,
            external_id: Some("pred-1".to_string()),
            status: JobStatus::Starting,
            error_message: None,
        },
    )
    .await
    .unwrap();
    assert!(job.completed_at.is_none());

    GenerationJobRepo::update(
        &pool,
        job.id,
        &JobUpdate::succeeded("https://cdn/out.png".into(), "asset-1".into()),
    )
    .await
    .unwrap();

    let jobs = GenerationJobRepo::list_by_batch(&pool, batch.id).await.unwrap();
    assert_eq!(jobs[0].status, JobStatus::Succeeded);
    assert_eq!(jobs[0].asset_id.as_deref(), Some("asset-1"));
    assert!(jobs[0].completed_at.is_some());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn same_hash_resolves_to_same_reference(pool: PgPool) {
    let (first, created) = ReferenceImageRepo::insert_or_get(&pool, &new_reference("abc", "a.png"))
        .await
        .unwrap();
    assert!(created);

    let (second, created) = ReferenceImageRepo::insert_or_get(&pool, &new_reference("abc", "b.png"))
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(first.id, second.id);
    assert_eq!(second.filename, "a.png");

    let by_id = ReferenceImageRepo::find_by_id(&pool, first.id).await.unwrap().unwrap();
    assert_eq!(by_id.content_hash, "abc");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn upload_upsert_keeps_last_write(pool: PgPool) {
    let (image, _) = ReferenceImageRepo::insert_or_get(&pool, &new_reference("def", "c.png"))
        .await
        .unwrap();
    let now = Utc::now();

    for external_id in ["file-1", "file-2"] {
        ExternalUploadRepo::upsert(
            &pool,
            &ExternalUpload {
                reference_image_id: image.id,
                external_id: external_id.to_string(),
                expires_at: now + Duration::hours(24),
                uploaded_at: now,
            },
        )
        .await
        .unwrap();
    }

    let current = ExternalUploadRepo::find_current(&pool, image.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.external_id, "file-2");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn claim_next_pending_takes_each_batch_once(pool: PgPool) {
    let batch = BatchRepo::create(&pool, &new_batch(1)).await.unwrap();

    let claimed = BatchRepo::claim_next_pending(&pool).await.unwrap().unwrap();
    assert_eq!(claimed.id, batch.id);
    assert_eq!(claimed.status, BatchStatus::Pending);
    assert!(BatchRepo::claim_next_pending(&pool).await.unwrap().is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn batch_created_claimed_is_never_claimed_again(pool: PgPool) {
    let batch = BatchRepo::create(
        &pool,
        &CreateBatch {
            claimed: true,
            ..new_batch(1)
        },
    )
    .await
    .unwrap();
    assert_eq!(batch.status, BatchStatus::Pending);
    assert!(batch.claimed_at.is_some());

    assert!(BatchRepo::claim_next_pending(&pool).await.unwrap().is_none());
}

//! Repository for the `reference_images` table.

use imagegen_core::types::DbId;
use sqlx::PgPool;

use crate::models::reference_image::{NewReferenceImage, ReferenceImage};

/// Row shape returned by [`ReferenceImageRepo::insert_or_get`].
#[derive(sqlx::FromRow)]
struct InsertedReferenceImage {
    #[sqlx(flatten)]
    image: ReferenceImage,
    inserted: bool,
}

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, content_hash, filename, content_type, size_bytes, created_at";

/// Provides lookup and dedup-aware insertion for reference images.
pub struct ReferenceImageRepo;

impl ReferenceImageRepo {
    /// Insert a reference image, or return the existing row with the same
    /// content hash. The boolean is `true` when a new row was created.
    ///
    /// The no-op `DO UPDATE` makes `RETURNING` yield the existing row.
    pub async fn insert_or_get(
        pool: &PgPool,
        input: &NewReferenceImage,
    ) -> Result<(ReferenceImage, bool), sqlx::Error> {
        let query = format!(
            "INSERT INTO reference_images (content_hash, filename, content_type, size_bytes) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT ON CONSTRAINT uq_reference_images_content_hash \
             DO UPDATE SET content_hash = EXCLUDED.content_hash \
             RETURNING {COLUMNS}, (xmax = 0) AS inserted"
        );
        let row = sqlx::query_as::<_, InsertedReferenceImage>(&query)
            .bind(&input.content_hash)
            .bind(&input.filename)
            .bind(&input.content_type)
            .bind(input.size_bytes)
            .fetch_one(pool)
            .await?;
        Ok((row.image, row.inserted))
    }

    /// Find a reference image by its internal ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<ReferenceImage>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM reference_images WHERE id = $1");
        sqlx::query_as::<_, ReferenceImage>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}

//! Content addressing for reference images.
//!
//! Two uploads with identical bytes always map to the same digest, no
//! matter what filename or content type accompanied them.

use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest.
pub const CONTENT_HASH_LEN: usize = 64;

/// Compute the lowercase hex SHA-256 digest used as the dedup key.
pub fn content_hash(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Whether `value` looks like a digest produced by [`content_hash`].
pub fn is_content_hash(value: &str) -> bool {
    value.len() == CONTENT_HASH_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

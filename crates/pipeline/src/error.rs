use imagegen_core::error::CoreError;

/// Failures of the persistence port.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A uniqueness rule was violated (duplicate job index, for example).
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => CoreError::InvalidState(msg),
            StoreError::Database(e) => CoreError::Internal(format!("Database error: {e}")),
        }
    }
}

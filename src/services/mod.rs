pub mod aggregation;
pub mod analyzer;
pub mod blob_store;
pub mod entry_store;
pub mod image_prep;
pub mod ingestion;
pub mod media_access;

#[cfg(test)]
pub mod fakes;

/// Failure of either backing store (rows or blobs).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("object storage error: {0}")]
    Blob(String),
}

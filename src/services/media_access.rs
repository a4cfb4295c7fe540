use std::time::Duration;

use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use super::{
    blob_store::{user_prefix, BlobStore},
    StoreError,
};

/// Retrieval links live for exactly one hour.
pub const SIGNED_URL_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub url: String,
    pub expires_in: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("path does not belong to the requesting user")]
    Forbidden,

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Issue a fresh, read-only link for one of the caller's own images.
///
/// Ownership is the path prefix alone; the entry table is not consulted and
/// the check runs before storage is touched.
#[instrument(skip(blobs))]
pub async fn issue_retrieval_url(
    blobs: &dyn BlobStore,
    user_id: Uuid,
    path: &str,
) -> Result<SignedUrl, AccessError> {
    let prefix = user_prefix(user_id);
    if !path.starts_with(&prefix) || path.len() == prefix.len() {
        tracing::warn!(user_id = %user_id, path = %path, "Rejected foreign image path");
        return Err(AccessError::Forbidden);
    }

    let url = blobs.presign_get(path, SIGNED_URL_TTL).await?;

    Ok(SignedUrl {
        url,
        expires_in: SIGNED_URL_TTL.as_secs(),
    })
}

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client,
};
use bytes::Bytes;
use chrono::NaiveDate;
use tracing::instrument;
use uuid::Uuid;

use super::StoreError;

/// Image bucket. Keys are always `{user_id}/...`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, payload: Bytes, content_type: &str) -> Result<(), StoreError>;

    /// Read-only URL for exactly one object.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StoreError>;
}

/// Namespace prefix owning every object a user uploads.
pub fn user_prefix(user_id: Uuid) -> String {
    format!("{}/", user_id)
}

/// Key for a new upload. The random suffix keeps same-day resubmissions
/// from overwriting each other.
pub fn object_key(user_id: Uuid, date: NaiveDate, extension: &str) -> String {
    format!(
        "{}{}-{}.{}",
        user_prefix(user_id),
        date.format("%Y-%m-%d"),
        Uuid::new_v4().simple(),
        extension
    )
}

#[derive(Debug, Clone)]
pub struct ObjectStorageConfig {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(config: ObjectStorageConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "skintrack",
        );

        let endpoint = config.endpoint.trim_end_matches('/');

        tracing::info!(
            endpoint = %endpoint,
            region = %config.region,
            bucket = %config.bucket,
            "Initializing object storage client"
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket,
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self, payload), fields(size = payload.len()))]
    async fn put(&self, key: &str, payload: Bytes, content_type: &str) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(payload))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, object_key = %key, "Failed to upload object");
                StoreError::Blob(format!("failed to upload object: {}", e))
            })?;

        tracing::info!(object_key = %key, "Object uploaded");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StoreError> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StoreError::Blob(format!("invalid expiration: {}", e)))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, object_key = %key, "Failed to presign GET URL");
                StoreError::Blob(format!("failed to presign URL: {}", e))
            })?;

        Ok(presigned.uri().to_string())
    }
}

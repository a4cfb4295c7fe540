//! Daily submission pipeline: validate, upload, analyze, persist.
//!
//! Analysis is the only step allowed to fail without aborting the request;
//! its failure is replaced by [`AnalysisResult::fallback`].

use bytes::Bytes;
use chrono::NaiveDate;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use super::{
    analyzer::SkinAnalyzer,
    blob_store::{object_key, BlobStore},
    entry_store::EntryStore,
    image_prep::{prepare_image, ImageError, ImagePolicy, PreparedImage, MAX_STORED_BYTES},
    StoreError,
};
use crate::models::entry::{AnalysisResult, DailyEntry, LifestyleInput, NewDailyEntry};

#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub image: Option<UploadedImage>,
    /// Raw JSON from the `lifestyle` form field; absent means `{}`.
    pub lifestyle: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IngestionOutcome {
    pub entry: DailyEntry,
    pub ai_available: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("{0}")]
    Validation(String),

    #[error("failed to upload image: {0}")]
    Upload(#[source] StoreError),

    #[error("failed to save entry: {0}")]
    Persist(#[source] StoreError),

    #[error("image preparation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<ImageError> for IngestionError {
    fn from(err: ImageError) -> Self {
        let message = match err {
            ImageError::NotAnImage(_) => "File must be an image",
            ImageError::RawTooLarge { .. } => "Image must be under 10MB before compression",
            ImageError::Undecodable(_) => "Unsupported image format",
            ImageError::TooLargeAfterCompression { .. } => "Image must be under 2MB",
        };
        IngestionError::Validation(message.to_string())
    }
}

pub struct Ingestion<'a> {
    pub entries: &'a dyn EntryStore,
    pub blobs: &'a dyn BlobStore,
    pub analyzer: &'a dyn SkinAnalyzer,
    pub policy: ImagePolicy,
}

impl<'a> Ingestion<'a> {
    pub fn new(
        entries: &'a dyn EntryStore,
        blobs: &'a dyn BlobStore,
        analyzer: &'a dyn SkinAnalyzer,
    ) -> Self {
        Self {
            entries,
            blobs,
            analyzer,
            policy: ImagePolicy::default(),
        }
    }

    #[instrument(skip(self, submission))]
    pub async fn submit(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        submission: Submission,
    ) -> Result<IngestionOutcome, IngestionError> {
        // 1. Validate. Nothing is written until every check passes.
        let upload = submission
            .image
            .ok_or_else(|| IngestionError::Validation("No image provided".into()))?;

        let image = self.prepare(upload).await?;
        if image.bytes.len() > MAX_STORED_BYTES {
            return Err(IngestionError::Validation("Image must be under 2MB".into()));
        }

        let lifestyle = parse_lifestyle(submission.lifestyle.as_deref())?;

        // 2. Upload.
        let key = object_key(user_id, date, image.extension());
        self.blobs
            .put(&key, image.bytes.clone(), &image.mime_type)
            .await
            .map_err(IngestionError::Upload)?;

        // 3. Analyze; unavailability degrades to defaults.
        let (analysis, ai_available) =
            match self.analyzer.analyze(image.bytes, &image.mime_type).await {
                Ok(analysis) => (analysis, true),
                Err(e) => {
                    tracing::warn!(error = %e, "Skin analysis unavailable, storing defaults");
                    (AnalysisResult::fallback(), false)
                }
            };

        // 4. Persist. A failure here leaves the uploaded object behind.
        let entry = self
            .entries
            .upsert(NewDailyEntry {
                user_id,
                date,
                image_url: Some(key),
                analysis,
                lifestyle,
            })
            .await
            .map_err(IngestionError::Persist)?;

        tracing::info!(
            entry_id = %entry.id,
            ai_available = ai_available,
            "Daily entry saved"
        );

        Ok(IngestionOutcome {
            entry,
            ai_available,
        })
    }

    async fn prepare(&self, upload: UploadedImage) -> Result<PreparedImage, IngestionError> {
        let policy = self.policy.clone();
        let prepared = tokio::task::spawn_blocking(move || {
            prepare_image(&upload.bytes, &upload.content_type, &policy)
        })
        .await??;
        Ok(prepared)
    }
}

fn parse_lifestyle(raw: Option<&str>) -> Result<LifestyleInput, IngestionError> {
    let invalid = || IngestionError::Validation("Invalid lifestyle data".into());

    let input: LifestyleInput = serde_json::from_str(raw.unwrap_or("{}")).map_err(|e| {
        tracing::debug!(error = %e, "Lifestyle payload did not parse");
        invalid()
    })?;
    input.validate().map_err(|e| {
        tracing::debug!(error = %e, "Lifestyle payload out of range");
        invalid()
    })?;

    Ok(input)
}

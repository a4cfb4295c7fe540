use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;

use crate::auth::middleware::AuthUser;
use crate::dto::AnalyzeResponse;
use crate::error::{AppError, AppResult};
use crate::services::ingestion::{Ingestion, IngestionError, Submission, UploadedImage};
use crate::AppState;

impl From<IngestionError> for AppError {
    fn from(err: IngestionError) -> Self {
        match err {
            IngestionError::Validation(msg) => AppError::Validation(msg),
            IngestionError::Upload(e) => AppError::storage("Failed to upload image", e),
            IngestionError::Persist(e) => AppError::storage("Failed to save entry", e),
            IngestionError::Task(e) => AppError::Internal(e.into()),
        }
    }
}

/// Bodies cut off by the request size limit are reported as an oversized image.
fn form_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::Validation("Image must be under 10MB before compression".into());
    }
    tracing::debug!(error = %err, "Unreadable multipart body");
    AppError::Validation("Invalid form data".into())
}

pub async fn analyze(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> AppResult<Json<AnalyzeResponse>> {
    let mut submission = Submission::default();

    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "image" => {
                let content_type = field.content_type().unwrap_or("").to_string();
                let bytes = field.bytes().await.map_err(form_error)?;
                if !bytes.is_empty() {
                    submission.image = Some(UploadedImage {
                        bytes,
                        content_type,
                    });
                }
            }
            "lifestyle" => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| AppError::Validation("Invalid lifestyle data".into()))?;
                submission.lifestyle = Some(text);
            }
            _ => {}
        }
    }

    let today = Utc::now().date_naive();
    let outcome = Ingestion::new(
        state.entries.as_ref(),
        state.blobs.as_ref(),
        state.analyzer.as_ref(),
    )
    .submit(auth_user.id, today, submission)
    .await?;

    Ok(Json(AnalyzeResponse {
        success: true,
        entry: outcome.entry,
        ai_available: outcome.ai_available,
    }))
}

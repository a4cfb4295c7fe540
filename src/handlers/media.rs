use axum::{
    extract::{Query, State},
    Extension, Json,
};

use crate::auth::middleware::AuthUser;
use crate::dto::SignedUrlQuery;
use crate::error::{AppError, AppResult};
use crate::services::media_access::{issue_retrieval_url, AccessError, SignedUrl};
use crate::AppState;

impl From<AccessError> for AppError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Forbidden => AppError::Forbidden,
            AccessError::Storage(e) => AppError::storage("Failed to create signed URL", e),
        }
    }
}

pub async fn signed_url(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<SignedUrlQuery>,
) -> AppResult<Json<SignedUrl>> {
    let path = query
        .path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::Validation("Path required".into()))?;

    let signed = issue_retrieval_url(state.blobs.as_ref(), auth_user.id, &path).await?;

    Ok(Json(signed))
}

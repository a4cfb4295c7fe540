use axum::{
    extract::{Query, State},
    Extension, Json,
};

use crate::auth::middleware::AuthUser;
use crate::dto::{EntriesResponse, HistoryQuery};
use crate::error::{AppError, AppResult};
use crate::AppState;

/// Newest-first history for the caller, capped by `limit`.
pub async fn list_entries(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<EntriesResponse>> {
    let entries = state
        .entries
        .list(auth_user.id, query.limit())
        .await
        .map_err(|e| AppError::storage("Failed to fetch entries", e))?;

    Ok(Json(EntriesResponse { entries }))
}

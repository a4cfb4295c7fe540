use axum::{
    extract::{Query, State},
    Extension, Json,
};

use crate::auth::middleware::AuthUser;
use crate::dto::{BeforeAfterResponse, DashboardResponse, HistoryQuery, LatestSnapshot, PhotoRef};
use crate::error::{AppError, AppResult};
use crate::models::entry::DailyEntry;
use crate::services::aggregation::{
    average_of_last, build_chart_data, lesion_breakdown, select_before_after, sorted_by_date,
    total_lesions, DateOrder, EntryMetric,
};
use crate::services::media_access::issue_retrieval_url;
use crate::AppState;

/// Summary cards, trend series and the before/after pair in one payload.
pub async fn get_dashboard(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<DashboardResponse>> {
    let entries = state
        .entries
        .list(auth_user.id, query.limit())
        .await
        .map_err(|e| AppError::storage("Failed to fetch entries", e))?;

    let latest = sorted_by_date(&entries, DateOrder::Descending)
        .first()
        .map(|e| LatestSnapshot {
            date: e.date,
            overall_severity_score: e.overall_severity_score,
            total_lesions: total_lesions(e),
            inflammation_level: e.inflammation_level,
            confidence_pct: (e.confidence_score * 100.0).round() as i64,
        });

    let before_after = match select_before_after(&entries) {
        Some(pair) => Some(BeforeAfterResponse {
            before: photo_ref(&state, &auth_user, pair.before).await,
            after: photo_ref(&state, &auth_user, pair.after).await,
        }),
        None => None,
    };

    Ok(Json(DashboardResponse {
        entry_count: entries.len(),
        latest,
        avg_7: average_of_last(&entries, 7, EntryMetric::OverallSeverity),
        avg_30: average_of_last(&entries, 30, EntryMetric::OverallSeverity),
        severity: build_chart_data(&entries, EntryMetric::OverallSeverity),
        inflammation: build_chart_data(&entries, EntryMetric::Inflammation),
        lesions: lesion_breakdown(&entries),
        before_after,
    }))
}

async fn photo_ref(state: &AppState, auth_user: &AuthUser, entry: &DailyEntry) -> PhotoRef {
    let url = match entry.image_url.as_deref() {
        Some(path) => match issue_retrieval_url(state.blobs.as_ref(), auth_user.id, path).await {
            Ok(signed) => Some(signed.url),
            Err(e) => {
                tracing::warn!(error = %e, entry_id = %entry.id, "Could not sign comparison photo");
                None
            }
        },
        None => None,
    };

    PhotoRef {
        date: entry.date,
        url,
    }
}

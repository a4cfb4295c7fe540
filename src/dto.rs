//! # SkinTrack: Request/Response DTOs
//!
//! API contract types shared by the handlers.
//!
//! Conventions:
//! - `*Query`    → deserialized from query params
//! - `*Response` → serialized to client JSON
//! - Entry fields keep their snake_case column names; envelope flags that the
//!   web client reads directly (`aiAvailable`, `expiresIn`) are camelCase.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::entry::DailyEntry;
use crate::services::aggregation::{ChartPoint, LesionPoint};
use crate::services::entry_store::clamp_limit;

// ============================================================================
// Ingestion
// ============================================================================

/// POST /api/analyze
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub entry: DailyEntry,
    /// False when fallback defaults were stored instead of real analysis.
    #[serde(rename = "aiAvailable")]
    pub ai_available: bool,
}

// ============================================================================
// History
// ============================================================================

/// GET /api/entries and GET /api/dashboard
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Kept as text so a malformed value falls back to the default.
    pub limit: Option<String>,
}

impl HistoryQuery {
    pub fn limit(&self) -> i64 {
        clamp_limit(self.limit.as_deref().and_then(|l| l.trim().parse().ok()))
    }
}

#[derive(Debug, Serialize)]
pub struct EntriesResponse {
    pub entries: Vec<DailyEntry>,
}

// ============================================================================
// Media
// ============================================================================

/// GET /api/signed-url
#[derive(Debug, Deserialize)]
pub struct SignedUrlQuery {
    pub path: Option<String>,
}

// ============================================================================
// Dashboard
// ============================================================================

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub entry_count: usize,
    pub latest: Option<LatestSnapshot>,
    pub avg_7: f64,
    pub avg_30: f64,
    pub severity: Vec<ChartPoint>,
    pub inflammation: Vec<ChartPoint>,
    pub lesions: Vec<LesionPoint>,
    pub before_after: Option<BeforeAfterResponse>,
}

#[derive(Debug, Serialize)]
pub struct LatestSnapshot {
    pub date: NaiveDate,
    pub overall_severity_score: i32,
    pub total_lesions: i64,
    pub inflammation_level: i32,
    /// Confidence as a whole percentage.
    pub confidence_pct: i64,
}

#[derive(Debug, Serialize)]
pub struct BeforeAfterResponse {
    pub before: PhotoRef,
    pub after: PhotoRef,
}

#[derive(Debug, Serialize)]
pub struct PhotoRef {
    pub date: NaiveDate,
    /// `None` when a retrieval URL could not be issued.
    pub url: Option<String>,
}

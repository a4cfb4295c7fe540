use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// One user's skin record for one calendar day. Unique on `(user_id, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DailyEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub date: NaiveDate,
    /// Storage key inside the image bucket, not a fetchable URL.
    pub image_url: Option<String>,

    pub whiteheads: i32,
    pub blackheads: i32,
    pub papules: i32,
    pub pustules: i32,
    pub nodules_or_cysts: i32,
    pub inflammation_level: i32,
    pub oiliness_level: i32,
    pub dryness_level: i32,
    pub hyperpigmentation_level: i32,
    pub scarring_visible: bool,
    pub overall_severity_score: i32,
    pub confidence_score: f64,

    pub sleep_hours: Option<f64>,
    pub stress_level: Option<i32>,
    pub water_intake_liters: Option<f64>,
    pub exercise_done: Option<bool>,
    pub dairy_consumed: Option<bool>,
    pub sugar_level: Option<i32>,
    pub routine_notes: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Structured assessment returned by the visual-analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub whiteheads: i32,
    pub blackheads: i32,
    pub papules: i32,
    pub pustules: i32,
    pub nodules_or_cysts: i32,
    pub inflammation_level: i32,
    pub oiliness_level: i32,
    pub dryness_level: i32,
    pub hyperpigmentation_level: i32,
    pub scarring_visible: bool,
    pub overall_severity_score: i32,
    pub confidence_score: f64,
}

impl AnalysisResult {
    /// Values stored when analysis is unavailable. `confidence_score == 0`
    /// marks the entry as not analyzed.
    pub fn fallback() -> Self {
        Self {
            whiteheads: 0,
            blackheads: 0,
            papules: 0,
            pustules: 0,
            nodules_or_cysts: 0,
            inflammation_level: 1,
            oiliness_level: 1,
            dryness_level: 1,
            hyperpigmentation_level: 1,
            scarring_visible: false,
            overall_severity_score: 1,
            confidence_score: 0.0,
        }
    }
}

/// Self-reported lifestyle data submitted alongside the photo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct LifestyleInput {
    #[validate(range(min = 0.0, max = 14.0, message = "Sleep hours must be 0-14"))]
    pub sleep_hours: Option<f64>,

    #[validate(range(min = 1, max = 10, message = "Stress level must be 1-10"))]
    pub stress_level: Option<i32>,

    #[validate(range(min = 0.0, max = 6.0, message = "Water intake must be 0-6 liters"))]
    pub water_intake_liters: Option<f64>,

    pub exercise_done: Option<bool>,
    pub dairy_consumed: Option<bool>,

    #[validate(range(min = 1, max = 5, message = "Sugar level must be 1-5"))]
    pub sugar_level: Option<i32>,

    #[validate(length(max = 2000, message = "Notes must be under 2000 characters"))]
    pub routine_notes: Option<String>,
}

/// Fully merged row handed to the entry store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDailyEntry {
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub image_url: Option<String>,
    pub analysis: AnalysisResult,
    pub lifestyle: LifestyleInput,
}

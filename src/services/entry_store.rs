use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::StoreError;
use crate::models::entry::{DailyEntry, NewDailyEntry};

pub const DEFAULT_LIST_LIMIT: i64 = 90;
pub const MAX_LIST_LIMIT: i64 = 365;

/// Clamp a caller-supplied page size to `[1, MAX_LIST_LIMIT]`.
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Insert or fully replace the row for `(user_id, date)`.
    async fn upsert(&self, entry: NewDailyEntry) -> Result<DailyEntry, StoreError>;

    /// Newest first. `limit` must already be clamped.
    async fn list(&self, user_id: Uuid, limit: i64) -> Result<Vec<DailyEntry>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgEntryStore {
    db: PgPool,
}

impl PgEntryStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EntryStore for PgEntryStore {
    async fn upsert(&self, entry: NewDailyEntry) -> Result<DailyEntry, StoreError> {
        let NewDailyEntry {
            user_id,
            date,
            image_url,
            analysis,
            lifestyle,
        } = entry;

        // Every column is overwritten on conflict: a resubmission replaces the day.
        let row = sqlx::query_as::<_, DailyEntry>(
            r#"
            INSERT INTO daily_entries (
                id, user_id, date, image_url,
                whiteheads, blackheads, papules, pustules, nodules_or_cysts,
                inflammation_level, oiliness_level, dryness_level,
                hyperpigmentation_level, scarring_visible, overall_severity_score,
                confidence_score,
                sleep_hours, stress_level, water_intake_liters, exercise_done,
                dairy_consumed, sugar_level, routine_notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21, $22, $23)
            ON CONFLICT (user_id, date) DO UPDATE SET
                image_url = EXCLUDED.image_url,
                whiteheads = EXCLUDED.whiteheads,
                blackheads = EXCLUDED.blackheads,
                papules = EXCLUDED.papules,
                pustules = EXCLUDED.pustules,
                nodules_or_cysts = EXCLUDED.nodules_or_cysts,
                inflammation_level = EXCLUDED.inflammation_level,
                oiliness_level = EXCLUDED.oiliness_level,
                dryness_level = EXCLUDED.dryness_level,
                hyperpigmentation_level = EXCLUDED.hyperpigmentation_level,
                scarring_visible = EXCLUDED.scarring_visible,
                overall_severity_score = EXCLUDED.overall_severity_score,
                confidence_score = EXCLUDED.confidence_score,
                sleep_hours = EXCLUDED.sleep_hours,
                stress_level = EXCLUDED.stress_level,
                water_intake_liters = EXCLUDED.water_intake_liters,
                exercise_done = EXCLUDED.exercise_done,
                dairy_consumed = EXCLUDED.dairy_consumed,
                sugar_level = EXCLUDED.sugar_level,
                routine_notes = EXCLUDED.routine_notes,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(date)
        .bind(image_url)
        .bind(analysis.whiteheads)
        .bind(analysis.blackheads)
        .bind(analysis.papules)
        .bind(analysis.pustules)
        .bind(analysis.nodules_or_cysts)
        .bind(analysis.inflammation_level)
        .bind(analysis.oiliness_level)
        .bind(analysis.dryness_level)
        .bind(analysis.hyperpigmentation_level)
        .bind(analysis.scarring_visible)
        .bind(analysis.overall_severity_score)
        .bind(analysis.confidence_score)
        .bind(lifestyle.sleep_hours)
        .bind(lifestyle.stress_level)
        .bind(lifestyle.water_intake_liters)
        .bind(lifestyle.exercise_done)
        .bind(lifestyle.dairy_consumed)
        .bind(lifestyle.sugar_level)
        .bind(lifestyle.routine_notes)
        .fetch_one(&self.db)
        .await?;

        Ok(row)
    }

    async fn list(&self, user_id: Uuid, limit: i64) -> Result<Vec<DailyEntry>, StoreError> {
        let rows = sqlx::query_as::<_, DailyEntry>(
            r#"
            SELECT * FROM daily_entries
            WHERE user_id = $1
            ORDER BY date DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit_defaults_to_90() {
        assert_eq!(clamp_limit(None), 90);
    }

    #[test]
    fn test_clamp_limit_bounds() {
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-40)), 1);
        assert_eq!(clamp_limit(Some(30)), 30);
        assert_eq!(clamp_limit(Some(10_000)), 365);
    }
}

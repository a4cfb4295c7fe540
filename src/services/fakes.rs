//! In-memory stand-ins for the storage and analysis ports.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use uuid::Uuid;

use super::{
    analyzer::{AnalysisUnavailable, SkinAnalyzer},
    blob_store::BlobStore,
    entry_store::EntryStore,
    StoreError,
};
use crate::models::entry::{AnalysisResult, DailyEntry, NewDailyEntry};

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, (Bytes, String)>>,
    presigned: Mutex<Vec<(String, Duration)>>,
    fail: bool,
}

impl MemoryBlobStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn object(&self, key: &str) -> Option<(Bytes, String)> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn presigned(&self) -> Vec<(String, Duration)> {
        self.presigned.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, payload: Bytes, content_type: &str) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::Blob("bucket unavailable".into()));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (payload, content_type.to_string()));
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StoreError> {
        if self.fail {
            return Err(StoreError::Blob("bucket unavailable".into()));
        }
        self.presigned
            .lock()
            .unwrap()
            .push((key.to_string(), expires_in));
        Ok(format!(
            "https://storage.test/skin-images/{}?expires={}",
            key,
            expires_in.as_secs()
        ))
    }
}

/// Mirrors the `ON CONFLICT (user_id, date)` upsert of the Postgres store.
#[derive(Default)]
pub struct MemoryEntryStore {
    rows: Mutex<Vec<DailyEntry>>,
    fail: bool,
}

impl MemoryEntryStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn with_rows(rows: Vec<DailyEntry>) -> Self {
        Self {
            rows: Mutex::new(rows),
            fail: false,
        }
    }

    pub fn rows(&self) -> Vec<DailyEntry> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntryStore for MemoryEntryStore {
    async fn upsert(&self, entry: NewDailyEntry) -> Result<DailyEntry, StoreError> {
        if self.fail {
            return Err(StoreError::Blob("row store unavailable".into()));
        }

        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap();
        let existing = rows
            .iter()
            .position(|r| r.user_id == entry.user_id && r.date == entry.date);

        let (id, created_at) = match existing {
            Some(i) => (rows[i].id, rows[i].created_at),
            None => (Uuid::new_v4(), now),
        };

        let a = entry.analysis;
        let l = entry.lifestyle;
        let row = DailyEntry {
            id,
            user_id: entry.user_id,
            date: entry.date,
            image_url: entry.image_url,
            whiteheads: a.whiteheads,
            blackheads: a.blackheads,
            papules: a.papules,
            pustules: a.pustules,
            nodules_or_cysts: a.nodules_or_cysts,
            inflammation_level: a.inflammation_level,
            oiliness_level: a.oiliness_level,
            dryness_level: a.dryness_level,
            hyperpigmentation_level: a.hyperpigmentation_level,
            scarring_visible: a.scarring_visible,
            overall_severity_score: a.overall_severity_score,
            confidence_score: a.confidence_score,
            sleep_hours: l.sleep_hours,
            stress_level: l.stress_level,
            water_intake_liters: l.water_intake_liters,
            exercise_done: l.exercise_done,
            dairy_consumed: l.dairy_consumed,
            sugar_level: l.sugar_level,
            routine_notes: l.routine_notes,
            created_at,
            updated_at: now,
        };

        match existing {
            Some(i) => rows[i] = row.clone(),
            None => rows.push(row.clone()),
        }
        Ok(row)
    }

    async fn list(&self, user_id: Uuid, limit: i64) -> Result<Vec<DailyEntry>, StoreError> {
        if self.fail {
            return Err(StoreError::Blob("row store unavailable".into()));
        }
        let mut rows: Vec<DailyEntry> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.date.cmp(&a.date));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::Blob("row store unavailable".into()));
        }
        Ok(())
    }
}

/// Analyzer that either always fails or always returns the same result.
pub struct ScriptedAnalyzer {
    outcome: Option<AnalysisResult>,
    calls: AtomicUsize,
}

impl ScriptedAnalyzer {
    pub fn failing() -> Self {
        Self {
            outcome: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn returning(result: AnalysisResult) -> Self {
        Self {
            outcome: Some(result),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SkinAnalyzer for ScriptedAnalyzer {
    async fn analyze(
        &self,
        _image: Bytes,
        _mime_type: &str,
    ) -> Result<AnalysisResult, AnalysisUnavailable> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome
            .clone()
            .ok_or_else(|| AnalysisUnavailable::Malformed("scripted failure".into()))
    }
}

/// Builds a stored entry for aggregation tests.
pub fn entry_on(user_id: Uuid, date: &str, severity: i32) -> DailyEntry {
    let now = Utc::now();
    DailyEntry {
        id: Uuid::new_v4(),
        user_id,
        date: date.parse().unwrap(),
        image_url: None,
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
        overall_severity_score: severity,
        confidence_score: 0.9,
        sleep_hours: None,
        stress_level: None,
        water_intake_liters: None,
        exercise_done: None,
        dairy_consumed: None,
        sugar_level: None,
        routine_notes: None,
        created_at: now,
        updated_at: now,
    }
}

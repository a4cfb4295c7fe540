//! Time-series statistics over a user's entry history.
//!
//! Every function sorts its input itself, so results never depend on the
//! order entries were fetched in.

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::entry::DailyEntry;

/// Window of the trailing moving average in chart series.
pub const TRAILING_WINDOW: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateOrder {
    Ascending,
    Descending,
}

/// Numeric entry fields that can be averaged or charted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMetric {
    OverallSeverity,
    Inflammation,
    Oiliness,
    Dryness,
    Hyperpigmentation,
    Whiteheads,
    Blackheads,
    Papules,
    Pustules,
    NodulesOrCysts,
    TotalLesions,
}

impl EntryMetric {
    pub fn value(self, entry: &DailyEntry) -> f64 {
        let v = match self {
            EntryMetric::OverallSeverity => entry.overall_severity_score,
            EntryMetric::Inflammation => entry.inflammation_level,
            EntryMetric::Oiliness => entry.oiliness_level,
            EntryMetric::Dryness => entry.dryness_level,
            EntryMetric::Hyperpigmentation => entry.hyperpigmentation_level,
            EntryMetric::Whiteheads => entry.whiteheads,
            EntryMetric::Blackheads => entry.blackheads,
            EntryMetric::Papules => entry.papules,
            EntryMetric::Pustules => entry.pustules,
            EntryMetric::NodulesOrCysts => entry.nodules_or_cysts,
            EntryMetric::TotalLesions => return total_lesions(entry) as f64,
        };
        f64::from(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub date: NaiveDate,
    pub value: f64,
    pub avg7: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LesionPoint {
    pub date: NaiveDate,
    pub whiteheads: i32,
    pub blackheads: i32,
    pub papules: i32,
    pub pustules: i32,
    pub nodules: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeforeAfter<'a> {
    pub before: &'a DailyEntry,
    pub after: &'a DailyEntry,
}

/// Entries sorted by date; `id` breaks ties so the order is total.
pub fn sorted_by_date(entries: &[DailyEntry], order: DateOrder) -> Vec<&DailyEntry> {
    let mut sorted: Vec<&DailyEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
    if order == DateOrder::Descending {
        sorted.reverse();
    }
    sorted
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    values.sum::<f64>() / n as f64
}

/// Mean of `metric` over the `n` most recent entries, to one decimal.
/// Input order is irrelevant: entries are ranked [`DateOrder::Descending`]
/// before the window is taken. Returns 0.0 when there is nothing to average.
pub fn average_of_last(entries: &[DailyEntry], n: usize, metric: EntryMetric) -> f64 {
    let recent = sorted_by_date(entries, DateOrder::Descending);
    let window = &recent[..n.min(recent.len())];
    round1(mean(window.iter().map(|e| metric.value(e))))
}

pub fn total_lesions(entry: &DailyEntry) -> i64 {
    [
        entry.whiteheads,
        entry.blackheads,
        entry.papules,
        entry.pustules,
        entry.nodules_or_cysts,
    ]
    .iter()
    .map(|&c| i64::from(c))
    .sum()
}

/// Chronological series with a trailing 7-point moving average. Output is
/// always [`DateOrder::Ascending`] whatever the input order. Point `k`
/// averages points `max(0, k-6)..=k`; later entries never contribute.
pub fn build_chart_data(entries: &[DailyEntry], metric: EntryMetric) -> Vec<ChartPoint> {
    let sorted = sorted_by_date(entries, DateOrder::Ascending);
    let values: Vec<f64> = sorted.iter().map(|e| metric.value(e)).collect();

    sorted
        .iter()
        .enumerate()
        .map(|(k, entry)| {
            let start = (k + 1).saturating_sub(TRAILING_WINDOW);
            ChartPoint {
                date: entry.date,
                value: values[k],
                avg7: round1(mean(values[start..=k].iter().copied())),
            }
        })
        .collect()
}

/// Per-entry lesion counts, [`DateOrder::Ascending`], for a stacked chart.
pub fn lesion_breakdown(entries: &[DailyEntry]) -> Vec<LesionPoint> {
    sorted_by_date(entries, DateOrder::Ascending)
        .into_iter()
        .map(|e| LesionPoint {
            date: e.date,
            whiteheads: e.whiteheads,
            blackheads: e.blackheads,
            papules: e.papules,
            pustules: e.pustules,
            nodules: e.nodules_or_cysts,
        })
        .collect()
}

/// Earliest and latest entries that have a photo, if there are at least two.
pub fn select_before_after(entries: &[DailyEntry]) -> Option<BeforeAfter<'_>> {
    let with_photo: Vec<&DailyEntry> = sorted_by_date(entries, DateOrder::Ascending)
        .into_iter()
        .filter(|e| e.image_url.as_deref().is_some_and(|url| !url.is_empty()))
        .collect();

    if with_photo.len() < 2 {
        return None;
    }

    Some(BeforeAfter {
        before: with_photo[0],
        after: with_photo[with_photo.len() - 1],
    })
}

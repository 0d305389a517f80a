use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Inclusive range of UTC calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The `days` calendar days immediately before `day`, excluding `day`.
    pub fn trailing_before(day: NaiveDate, days: u32) -> Self {
        let start = day.checked_sub_days(Days::new(u64::from(days))).unwrap_or(NaiveDate::MIN);
        let end = day.pred_opt().unwrap_or(NaiveDate::MIN);
        Self { start, end }
    }

    /// The `days` calendar days ending on (and including) `day`.
    pub fn ending_on(day: NaiveDate, days: u32) -> Self {
        let back = u64::from(days.saturating_sub(1));
        let start = day.checked_sub_days(Days::new(back)).unwrap_or(NaiveDate::MIN);
        Self { start, end: day }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

/// Daily trial sign-up count for one app, written by upstream ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialCountRecord {
    pub app_id: String,
    pub date: NaiveDate,
    pub count: u64,
}

/// The four engagement counters tracked per video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub views: u64,
    pub comments: u64,
    pub likes: u64,
    pub shares: u64,
}

/// Snapshot of a video's metrics as of `observed_at`.
///
/// `metrics` is `None` for a video that has been registered but never
/// measured; diffing against it yields `DeltaOutcome::NoBaseline`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub app_id: String,
    pub observed_at: NaiveDate,
    pub creator: Option<String>,
    pub metrics: Option<EngagementMetrics>,
}

/// Signed per-field change between two snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricDeltas {
    pub views: i64,
    pub comments: i64,
    pub likes: i64,
    pub shares: i64,
}

/// Append-only delta record tied to one trigger event (same app and date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoMetricDelta {
    pub video_id: String,
    pub app_id: String,
    pub trigger_date: NaiveDate,
    pub creator: Option<String>,
    pub old: EngagementMetrics,
    pub new: EngagementMetrics,
    pub delta: MetricDeltas,
}

/// Persisted marker that an app's trial volume was anomalous on `date`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerEvent {
    pub app_id: String,
    pub date: NaiveDate,
    pub today_count: u64,
    pub baseline_median: f64,
    pub margin: f64,
    pub mode: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn trailing_window_excludes_the_day_itself() {
        let range = DateRange::trailing_before(day("2026-03-31"), 30);
        assert_eq!(range.start, day("2026-03-01"));
        assert_eq!(range.end, day("2026-03-30"));
        assert!(!range.contains(day("2026-03-31")));
    }

    #[test]
    fn ending_window_spans_exact_day_count() {
        let range = DateRange::ending_on(day("2026-03-10"), 10);
        assert_eq!(range.start, day("2026-03-01"));
        assert_eq!(range.end, day("2026-03-10"));
        assert!(range.contains(day("2026-03-01")));
        assert!(!range.contains(day("2026-02-28")));
    }
}

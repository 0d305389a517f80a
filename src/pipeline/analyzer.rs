//! Baseline computation and the anomaly decision for one app/day.

use crate::config::{AnalyzerConfig, ThresholdMode};
use crate::error::StoreError;
use crate::model::DateRange;
use crate::store::HistoryStore;
use chrono::NaiveDate;
use std::sync::Arc;

/// Why a day could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotEvaluableReason {
    /// Fewer stored history days than `min_history_days`.
    InsufficientHistory { found: usize, required: usize },
    /// No trial-count record exists yet for the day under evaluation.
    MissingToday,
}

/// Anomalous-day details carried into the trigger ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Anomaly {
    pub baseline: f64,
    pub today_count: u64,
    /// `today_count - baseline`.
    pub margin: f64,
    pub mode: ThresholdMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    NotEvaluable(NotEvaluableReason),
    Normal { baseline: f64, today_count: u64 },
    Anomalous(Anomaly),
}

/// Median with the mean-of-middles rule for even lengths.
///
/// Returns `None` for an empty slice. Independent of input order.
pub fn median(values: &[u64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid] as f64)
    } else {
        Some((sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0)
    }
}

/// The single rule for "significant activity". Comparison is strict.
pub fn exceeds_threshold(config: &AnalyzerConfig, baseline: f64, today_count: u64) -> bool {
    let today = today_count as f64;
    match config.mode {
        ThresholdMode::Additive => today > baseline + config.additive_threshold,
        ThresholdMode::Relative => today > baseline * (1.0 + config.relative_threshold),
    }
}

pub struct TrialAnalyzer {
    history: Arc<dyn HistoryStore>,
    config: AnalyzerConfig,
}

impl TrialAnalyzer {
    pub fn new(history: Arc<dyn HistoryStore>, config: AnalyzerConfig) -> Self {
        Self { history, config }
    }

    /// Decide whether `as_of`'s trial count is anomalous for `app_id`.
    ///
    /// Reads only; store errors are the sole failure path.
    pub async fn evaluate(&self, app_id: &str, as_of: NaiveDate) -> Result<Decision, StoreError> {
        let window = DateRange::trailing_before(as_of, self.config.history_days);
        let history = self.history.trial_counts(app_id, window).await?;
        let counts: Vec<u64> = history
            .iter()
            .filter(|r| window.contains(r.date))
            .map(|r| r.count)
            .collect();

        let required = self.config.min_history_days as usize;
        let baseline = match median(&counts) {
            Some(b) if counts.len() >= required => b,
            _ => {
                return Ok(Decision::NotEvaluable(
                    NotEvaluableReason::InsufficientHistory {
                        found: counts.len(),
                        required,
                    },
                ))
            }
        };

        let today = self
            .history
            .trial_counts(app_id, DateRange::new(as_of, as_of))
            .await?
            .into_iter()
            .find(|r| r.date == as_of);
        let Some(today) = today else {
            return Ok(Decision::NotEvaluable(NotEvaluableReason::MissingToday));
        };

        tracing::debug!(
            app_id,
            date = %as_of,
            history_days = counts.len(),
            baseline,
            today_count = today.count,
            "evaluated trial volume"
        );

        if exceeds_threshold(&self.config, baseline, today.count) {
            Ok(Decision::Anomalous(Anomaly {
                baseline,
                today_count: today.count,
                margin: today.count as f64 - baseline,
                mode: self.config.mode,
            }))
        } else {
            Ok(Decision::Normal {
                baseline,
                today_count: today.count,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use chrono::Days;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn additive(threshold: f64) -> AnalyzerConfig {
        AnalyzerConfig {
            mode: ThresholdMode::Additive,
            additive_threshold: threshold,
            ..AnalyzerConfig::default()
        }
    }

    /// Store with `history.len()` consecutive days ending the day before `as_of`.
    fn seeded(as_of: NaiveDate, history: &[u64], today: Option<u64>) -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        for (i, count) in history.iter().rev().enumerate() {
            let d = as_of.checked_sub_days(Days::new(i as u64 + 1)).unwrap();
            store.record_trial_count("saga", d, *count).unwrap();
        }
        if let Some(count) = today {
            store.record_trial_count("saga", as_of, count).unwrap();
        }
        Arc::new(store)
    }

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&[2, 4, 4, 6, 8]), Some(4.0));
        assert_eq!(median(&[2, 4, 6, 8]), Some(5.0));
        assert_eq!(median(&[7]), Some(7.0));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn median_is_order_independent() {
        let samples: [&[u64]; 4] = [&[9, 1, 5, 3, 7], &[10, 2, 8, 4], &[3, 3, 1], &[100, 0]];
        for seq in samples {
            let reversed: Vec<u64> = seq.iter().rev().copied().collect();
            assert_eq!(median(seq), median(&reversed));
        }
    }

    #[test]
    fn additive_boundary_is_not_anomalous() {
        let config = additive(5.0);
        assert!(!exceeds_threshold(&config, 10.0, 15));
        assert!(exceeds_threshold(&config, 10.0, 16));
    }

    #[test]
    fn relative_rule_scales_with_baseline() {
        let config = AnalyzerConfig {
            mode: ThresholdMode::Relative,
            relative_threshold: 0.5,
            ..AnalyzerConfig::default()
        };
        assert!(!exceeds_threshold(&config, 10.0, 15));
        assert!(exceeds_threshold(&config, 10.0, 16));
        assert!(!exceeds_threshold(&config, 0.0, 0));
        assert!(exceeds_threshold(&config, 0.0, 1));
    }

    #[tokio::test]
    async fn spike_over_baseline_is_anomalous() {
        let as_of = day("2026-03-31");
        let store = seeded(as_of, &[10; 30], Some(16));
        let analyzer = TrialAnalyzer::new(store, additive(5.0));
        match analyzer.evaluate("saga", as_of).await.unwrap() {
            Decision::Anomalous(a) => {
                assert_eq!(a.baseline, 10.0);
                assert_eq!(a.today_count, 16);
                assert_eq!(a.margin, 6.0);
            }
            other => panic!("expected Anomalous, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn count_at_threshold_is_normal() {
        let as_of = day("2026-03-31");
        let store = seeded(as_of, &[10; 30], Some(15));
        let analyzer = TrialAnalyzer::new(store, additive(5.0));
        assert_eq!(
            analyzer.evaluate("saga", as_of).await.unwrap(),
            Decision::Normal { baseline: 10.0, today_count: 15 }
        );
    }

    #[tokio::test]
    async fn sparse_history_is_not_evaluable() {
        let as_of = day("2026-03-31");
        let store = seeded(as_of, &[10; 6], Some(500));
        let analyzer = TrialAnalyzer::new(store, additive(5.0));
        assert_eq!(
            analyzer.evaluate("saga", as_of).await.unwrap(),
            Decision::NotEvaluable(NotEvaluableReason::InsufficientHistory { found: 6, required: 7 })
        );
    }

    #[tokio::test]
    async fn missing_today_is_not_evaluable() {
        let as_of = day("2026-03-31");
        let store = seeded(as_of, &[10; 30], None);
        let analyzer = TrialAnalyzer::new(store, additive(5.0));
        assert_eq!(
            analyzer.evaluate("saga", as_of).await.unwrap(),
            Decision::NotEvaluable(NotEvaluableReason::MissingToday)
        );
    }

    #[tokio::test]
    async fn history_outside_window_and_today_are_excluded() {
        let as_of = day("2026-03-31");
        // 40 days of history; only the last 30 count toward the median.
        let mut history = vec![1000; 10];
        history.extend([4; 30]);
        let store = seeded(as_of, &history, Some(5));
        let analyzer = TrialAnalyzer::new(store, additive(5.0));
        assert_eq!(
            analyzer.evaluate("saga", as_of).await.unwrap(),
            Decision::Normal { baseline: 4.0, today_count: 5 }
        );
    }
}

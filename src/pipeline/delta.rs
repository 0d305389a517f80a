use crate::error::StoreError;
use crate::model::{EngagementMetrics, MetricDeltas, VideoMetricDelta, VideoRecord};
use crate::store::VideoStore;
use chrono::NaiveDate;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOutcome {
    Computed(VideoMetricDelta),
    /// The previous snapshot carried no metrics; no delta is defined.
    NoBaseline,
}

fn signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Field-wise `new - old`. Negative values are kept as reported.
pub fn metric_deltas(old: &EngagementMetrics, new: &EngagementMetrics) -> MetricDeltas {
    MetricDeltas {
        views: signed(new.views).saturating_sub(signed(old.views)),
        comments: signed(new.comments).saturating_sub(signed(old.comments)),
        likes: signed(new.likes).saturating_sub(signed(old.likes)),
        shares: signed(new.shares).saturating_sub(signed(old.shares)),
    }
}

/// Diff two snapshots of the same video for the trigger on `trigger_date`.
pub fn diff(trigger_date: NaiveDate, old: &VideoRecord, new: &VideoRecord) -> DeltaOutcome {
    let (Some(old_metrics), Some(new_metrics)) = (old.metrics, new.metrics) else {
        return DeltaOutcome::NoBaseline;
    };
    DeltaOutcome::Computed(VideoMetricDelta {
        video_id: new.video_id.clone(),
        app_id: new.app_id.clone(),
        trigger_date,
        creator: new.creator.clone().or_else(|| old.creator.clone()),
        old: old_metrics,
        new: new_metrics,
        delta: metric_deltas(&old_metrics, &new_metrics),
    })
}

/// Computes a video's delta and commits it with the new snapshot.
pub struct DeltaComputer {
    store: Arc<dyn VideoStore>,
}

impl DeltaComputer {
    pub fn new(store: Arc<dyn VideoStore>) -> Self {
        Self { store }
    }

    /// Snapshot and delta are committed together; on error neither is stored.
    /// For `NoBaseline` only the snapshot is written, so the next trigger has
    /// something to diff against.
    pub async fn apply(
        &self,
        trigger_date: NaiveDate,
        previous: &VideoRecord,
        current: &VideoRecord,
    ) -> Result<DeltaOutcome, StoreError> {
        let outcome = diff(trigger_date, previous, current);
        let delta = match &outcome {
            DeltaOutcome::Computed(delta) => Some(delta),
            DeltaOutcome::NoBaseline => None,
        };
        self.store.commit_refresh(current, delta).await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TriggerEvent;
    use crate::store::{SqliteStore, TriggerStore, TrialwatchReader};
    use tempfile::TempDir;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn record(observed: &str, metrics: Option<EngagementMetrics>) -> VideoRecord {
        VideoRecord {
            video_id: "https://www.tiktok.com/@a/video/1".into(),
            app_id: "saga".into(),
            observed_at: day(observed),
            creator: None,
            metrics,
        }
    }

    #[test]
    fn negative_deltas_are_preserved() {
        let old = EngagementMetrics { views: 100, likes: 10, ..Default::default() };
        let new = EngagementMetrics { views: 90, likes: 15, ..Default::default() };
        let delta = metric_deltas(&old, &new);
        assert_eq!(delta.views, -10);
        assert_eq!(delta.likes, 5);
        assert_eq!(delta.comments, 0);
        assert_eq!(delta.shares, 0);
    }

    #[test]
    fn diff_carries_old_and_new_values() {
        let old = record("2026-03-05", Some(EngagementMetrics { views: 100, comments: 2, likes: 10, shares: 1 }));
        let new = record("2026-03-10", Some(EngagementMetrics { views: 150, comments: 1, likes: 12, shares: 4 }));
        match diff(day("2026-03-10"), &old, &new) {
            DeltaOutcome::Computed(d) => {
                assert_eq!(d.old.views, 100);
                assert_eq!(d.new.views, 150);
                assert_eq!(d.delta, MetricDeltas { views: 50, comments: -1, likes: 2, shares: 3 });
                assert_eq!(d.trigger_date, day("2026-03-10"));
            }
            DeltaOutcome::NoBaseline => panic!("expected a computed delta"),
        }
    }

    #[test]
    fn unmeasured_previous_snapshot_has_no_baseline() {
        let old = record("2026-03-05", None);
        let new = record("2026-03-10", Some(EngagementMetrics::default()));
        assert_eq!(diff(day("2026-03-10"), &old, &new), DeltaOutcome::NoBaseline);
    }

    #[tokio::test]
    async fn apply_writes_snapshot_only_when_no_baseline() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("trialwatch.db");
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        store
            .insert_if_absent(&TriggerEvent {
                app_id: "saga".into(),
                date: day("2026-03-10"),
                today_count: 30,
                baseline_median: 10.0,
                margin: 20.0,
                mode: "additive".into(),
                created_at: "2026-03-10T00:00:00Z".into(),
            })
            .await
            .unwrap();
        let computer = DeltaComputer::new(store.clone());

        let old = record("2026-03-05", None);
        let new = record("2026-03-10", Some(EngagementMetrics { views: 5, ..Default::default() }));
        let outcome = computer.apply(day("2026-03-10"), &old, &new).await.unwrap();
        assert_eq!(outcome, DeltaOutcome::NoBaseline);
        drop(computer);
        drop(store);

        let reader = TrialwatchReader::open(&path).unwrap();
        assert!(reader.deltas("saga", "2026-03-10").unwrap().is_empty());
    }
}

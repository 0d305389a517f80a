use crate::error::{PipelineError, StoreError};
use crate::model::{DateRange, TriggerEvent};
use crate::notify::{
    DeltaHighlight, FailureKind, NotificationDispatcher, RunStatus, RunSummary, VideoFailure,
};
use crate::pipeline::analyzer::{Decision, NotEvaluableReason, TrialAnalyzer};
use crate::pipeline::delta::{DeltaComputer, DeltaOutcome};
use crate::pipeline::ledger::{LedgerOutcome, TriggerLedger};
use crate::pipeline::refresher::{RefreshResult, VideoMetricsRefresher};
use crate::store::HistoryStore;
use chrono::NaiveDate;
use std::sync::Arc;

const MAX_HIGHLIGHTS: usize = 5;

/// How a single pipeline invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    NotEvaluable(NotEvaluableReason),
    Normal { baseline: f64, today_count: u64 },
    /// Another run already handled this app/day; nothing was refreshed.
    AlreadyTriggered(TriggerEvent),
    Processed(RunSummary),
}

/// Runs evaluate → record → refresh → diff → notify for one app and day.
pub struct PipelineCoordinator {
    analyzer: TrialAnalyzer,
    ledger: TriggerLedger,
    history: Arc<dyn HistoryStore>,
    refresher: VideoMetricsRefresher,
    deltas: DeltaComputer,
    notifier: Arc<dyn NotificationDispatcher>,
    candidate_window_days: u32,
}

impl PipelineCoordinator {
    pub fn new(
        analyzer: TrialAnalyzer,
        ledger: TriggerLedger,
        history: Arc<dyn HistoryStore>,
        refresher: VideoMetricsRefresher,
        deltas: DeltaComputer,
        notifier: Arc<dyn NotificationDispatcher>,
        candidate_window_days: u32,
    ) -> Self {
        Self {
            analyzer,
            ledger,
            history,
            refresher,
            deltas,
            notifier,
            candidate_window_days,
        }
    }

    pub async fn run(&self, app_id: &str, as_of: NaiveDate) -> Result<RunOutcome, PipelineError> {
        let store_err = |source: StoreError| PipelineError::Store {
            app_id: app_id.to_string(),
            date: as_of,
            source,
        };

        let anomaly = match self.analyzer.evaluate(app_id, as_of).await.map_err(store_err)? {
            Decision::NotEvaluable(reason) => {
                tracing::info!(app_id, date = %as_of, ?reason, "trial volume not evaluable");
                return Ok(RunOutcome::NotEvaluable(reason));
            }
            Decision::Normal { baseline, today_count } => {
                tracing::info!(app_id, date = %as_of, baseline, today_count, "no significant trial activity");
                return Ok(RunOutcome::Normal { baseline, today_count });
            }
            Decision::Anomalous(anomaly) => anomaly,
        };

        // The trigger must be confirmed before any video is touched.
        let event = match self
            .ledger
            .record_if_absent(app_id, as_of, &anomaly)
            .await
            .map_err(store_err)?
        {
            LedgerOutcome::Created(event) => event,
            LedgerOutcome::AlreadyExists(event) => return Ok(RunOutcome::AlreadyTriggered(event)),
        };

        let window = DateRange::ending_on(as_of, self.candidate_window_days);
        let candidates = self
            .history
            .video_records(app_id, window)
            .await
            .map_err(store_err)?;
        let candidate_count = candidates.len();
        tracing::info!(app_id, date = %as_of, candidates = candidate_count, "refreshing video metrics");

        let batch = self.refresher.refresh(app_id, as_of, candidates).await;

        let mut failures = Vec::new();
        let mut highlights = Vec::new();
        let mut no_baseline = 0;
        let mut skipped = 0;
        for result in batch.results {
            match result {
                RefreshResult::Success { previous, current } => {
                    match self.deltas.apply(as_of, &previous, &current).await {
                        Ok(DeltaOutcome::Computed(delta)) => highlights.push(DeltaHighlight {
                            video_id: delta.video_id,
                            creator: delta.creator,
                            views: delta.delta.views,
                            comments: delta.delta.comments,
                            likes: delta.delta.likes,
                            shares: delta.delta.shares,
                        }),
                        Ok(DeltaOutcome::NoBaseline) => no_baseline += 1,
                        Err(err) => {
                            tracing::error!(
                                app_id,
                                date = %as_of,
                                video_id = current.video_id.as_str(),
                                error = %err,
                                "failed to commit refreshed metrics"
                            );
                            failures.push(VideoFailure {
                                video_id: current.video_id,
                                kind: FailureKind::StoreWrite,
                                message: err.to_string(),
                            });
                        }
                    }
                }
                RefreshResult::Failed { video_id, kind, message } => failures.push(VideoFailure {
                    video_id,
                    kind: FailureKind::Provider { kind },
                    message,
                }),
                RefreshResult::Skipped { .. } => skipped += 1,
            }
        }

        let deltas_written = highlights.len();
        highlights.sort_by(|a, b| b.views.cmp(&a.views).then_with(|| a.video_id.cmp(&b.video_id)));
        highlights.truncate(MAX_HIGHLIGHTS);

        let summary = RunSummary {
            run_id: uuid::Uuid::new_v4().to_string(),
            app_id: app_id.to_string(),
            date: as_of,
            today_count: event.today_count,
            baseline: event.baseline_median,
            margin: event.margin,
            status: if batch.aborted {
                RunStatus::BatchAborted
            } else {
                RunStatus::Completed
            },
            candidates: candidate_count,
            deltas_written,
            no_baseline,
            skipped,
            failures,
            highlights,
        };

        if let Err(err) = self.notifier.notify(&summary).await {
            tracing::warn!(app_id, run_id = summary.run_id.as_str(), error = %err, "notification failed");
        }
        Ok(RunOutcome::Processed(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnalyzerConfig, ThresholdMode};
    use crate::model::{EngagementMetrics, VideoRecord};
    use crate::pipeline::refresher::tests::ScriptedProvider;
    use crate::pipeline::refresher::RefreshPolicy;
    use crate::model::VideoMetricDelta;
    use crate::store::{InsertOutcome, SqliteStore, TriggerStore, TrialwatchReader, VideoStore};
    use async_trait::async_trait;
    use chrono::Days;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 31).unwrap()
    }

    fn video(id: &str, views: u64, likes: u64) -> VideoRecord {
        VideoRecord {
            video_id: id.into(),
            app_id: "saga".into(),
            observed_at: as_of().checked_sub_days(Days::new(3)).unwrap(),
            creator: Some(format!("creator-{id}")),
            metrics: Some(EngagementMetrics { views, likes, ..Default::default() }),
        }
    }

    fn seed(store: &SqliteStore, history_days: u64, today: u64) {
        for i in 1..=history_days {
            let d = as_of().checked_sub_days(Days::new(i)).unwrap();
            store.record_trial_count("saga", d, 10).unwrap();
        }
        store.record_trial_count("saga", as_of(), today).unwrap();
    }

    #[derive(Default)]
    struct RecordingNotifier {
        summaries: Mutex<Vec<RunSummary>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationDispatcher for RecordingNotifier {
        async fn notify(&self, summary: &RunSummary) -> anyhow::Result<()> {
            self.summaries.lock().push(summary.clone());
            if self.fail {
                anyhow::bail!("mail relay down");
            }
            Ok(())
        }
    }

    /// Counts ledger calls and forwards to the real store.
    struct SpyTriggerStore {
        inner: Arc<SqliteStore>,
        inserts: AtomicUsize,
    }

    #[async_trait]
    impl TriggerStore for SpyTriggerStore {
        async fn insert_if_absent(&self, event: &TriggerEvent) -> Result<InsertOutcome, StoreError> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            self.inner.insert_if_absent(event).await
        }

        async fn find(&self, app_id: &str, date: NaiveDate) -> Result<Option<TriggerEvent>, StoreError> {
            self.inner.find(app_id, date).await
        }
    }

    /// Rejects commits for one video and forwards the rest to the real store.
    struct FailingVideoStore {
        inner: Arc<SqliteStore>,
        reject: &'static str,
    }

    #[async_trait]
    impl VideoStore for FailingVideoStore {
        async fn commit_refresh(
            &self,
            snapshot: &VideoRecord,
            delta: Option<&VideoMetricDelta>,
        ) -> Result<(), StoreError> {
            if snapshot.video_id == self.reject {
                return Err(StoreError::Corrupt {
                    table: "video_snapshots",
                    detail: "disk full".into(),
                });
            }
            self.inner.commit_refresh(snapshot, delta).await
        }
    }

    struct Harness {
        coordinator: PipelineCoordinator,
        provider: Arc<ScriptedProvider>,
        notifier: Arc<RecordingNotifier>,
        spy: Arc<SpyTriggerStore>,
    }

    fn harness(store: Arc<SqliteStore>, provider: ScriptedProvider, notifier: RecordingNotifier) -> Harness {
        harness_with_videos(store.clone(), store, provider, notifier)
    }

    fn harness_with_videos(
        store: Arc<SqliteStore>,
        videos: Arc<dyn VideoStore>,
        provider: ScriptedProvider,
        notifier: RecordingNotifier,
    ) -> Harness {
        let provider = Arc::new(provider);
        let notifier = Arc::new(notifier);
        let spy = Arc::new(SpyTriggerStore {
            inner: store.clone(),
            inserts: AtomicUsize::new(0),
        });
        let analyzer = TrialAnalyzer::new(
            store.clone(),
            AnalyzerConfig {
                mode: ThresholdMode::Additive,
                additive_threshold: 5.0,
                ..AnalyzerConfig::default()
            },
        );
        let coordinator = PipelineCoordinator::new(
            analyzer,
            TriggerLedger::new(spy.clone()),
            store.clone(),
            VideoMetricsRefresher::new(
                provider.clone(),
                RefreshPolicy { concurrency: 2, max_failure_rate: 0.5 },
            ),
            DeltaComputer::new(videos),
            notifier.clone(),
            10,
        );
        Harness { coordinator, provider, notifier, spy }
    }

    fn five_videos(store: &SqliteStore) {
        for (i, id) in ["v1", "v2", "v3", "v4", "v5"].iter().enumerate() {
            store.record_snapshot(&video(id, 100 * (i as u64 + 1), 10)).unwrap();
        }
    }

    fn three_answers() -> ScriptedProvider {
        ScriptedProvider::new(&[
            ("v1", EngagementMetrics { views: 90, likes: 15, ..Default::default() }),
            ("v2", EngagementMetrics { views: 500, likes: 10, ..Default::default() }),
            ("v3", EngagementMetrics { views: 300, likes: 12, ..Default::default() }),
        ])
    }

    #[tokio::test]
    async fn spike_with_partial_failures_commits_successful_deltas() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("trialwatch.db");
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        seed(&store, 30, 40);
        five_videos(&store);
        let h = harness(store, three_answers(), RecordingNotifier::default());

        let outcome = h.coordinator.run("saga", as_of()).await.unwrap();
        let RunOutcome::Processed(summary) = outcome else {
            panic!("expected Processed");
        };
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.candidates, 5);
        assert_eq!(summary.deltas_written, 3);
        assert_eq!(summary.failure_count(), 2);
        assert_eq!(summary.highlights[0].video_id, "v2");
        assert_eq!(summary.highlights[0].views, 300);

        let notified = h.notifier.summaries.lock().clone();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].run_id, summary.run_id);

        let reader = TrialwatchReader::open(&path).unwrap();
        let deltas = reader.deltas("saga", "2026-03-31").unwrap();
        assert_eq!(deltas.len(), 3);
        let v1 = deltas.iter().find(|d| d.video_id == "v1").unwrap();
        assert_eq!((v1.delta_views, v1.delta_likes), (-10, 5));
    }

    #[tokio::test]
    async fn rerun_for_same_day_refreshes_nothing() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        seed(&store, 30, 40);
        five_videos(&store);
        let h = harness(store, three_answers(), RecordingNotifier::default());

        assert!(matches!(
            h.coordinator.run("saga", as_of()).await.unwrap(),
            RunOutcome::Processed(_)
        ));
        let calls_after_first = h.provider.calls.lock().len();

        let second = h.coordinator.run("saga", as_of()).await.unwrap();
        assert!(matches!(second, RunOutcome::AlreadyTriggered(ref e) if e.today_count == 40));
        assert_eq!(h.provider.calls.lock().len(), calls_after_first);
        assert_eq!(h.notifier.summaries.lock().len(), 1);
    }

    #[tokio::test]
    async fn sparse_history_never_reaches_the_ledger() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        seed(&store, 6, 400);
        five_videos(&store);
        let h = harness(store, three_answers(), RecordingNotifier::default());

        let outcome = h.coordinator.run("saga", as_of()).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::NotEvaluable(NotEvaluableReason::InsufficientHistory { found: 6, required: 7 })
        );
        assert_eq!(h.spy.inserts.load(Ordering::SeqCst), 0);
        assert!(h.provider.calls.lock().is_empty());
        assert!(h.notifier.summaries.lock().is_empty());
    }

    #[tokio::test]
    async fn normal_day_creates_no_trigger() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        seed(&store, 30, 15);
        let h = harness(store.clone(), three_answers(), RecordingNotifier::default());

        let outcome = h.coordinator.run("saga", as_of()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Normal { baseline: 10.0, today_count: 15 });
        assert_eq!(h.spy.inserts.load(Ordering::SeqCst), 0);
        assert!(store.find("saga", as_of()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn aborted_batch_is_reported_as_degraded() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        seed(&store, 30, 40);
        five_videos(&store);
        let h = harness(store, ScriptedProvider::new(&[]), RecordingNotifier::default());

        let RunOutcome::Processed(summary) = h.coordinator.run("saga", as_of()).await.unwrap() else {
            panic!("expected Processed");
        };
        assert_eq!(summary.status, RunStatus::BatchAborted);
        assert_eq!(summary.deltas_written, 0);
        assert_eq!(summary.failure_count() + summary.skipped, 5);
        assert_eq!(h.notifier.summaries.lock()[0].status, RunStatus::BatchAborted);
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_the_run() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        seed(&store, 30, 40);
        five_videos(&store);
        let notifier = RecordingNotifier { fail: true, ..RecordingNotifier::default() };
        let h = harness(store, three_answers(), notifier);

        let outcome = h.coordinator.run("saga", as_of()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Processed(ref s) if s.deltas_written == 3));
        assert_eq!(h.notifier.summaries.lock().len(), 1);
    }

    #[tokio::test]
    async fn store_write_failure_only_fails_that_video() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("trialwatch.db");
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        seed(&store, 30, 40);
        for id in ["v1", "v2", "v3"] {
            store.record_snapshot(&video(id, 100, 10)).unwrap();
        }
        let videos = Arc::new(FailingVideoStore { inner: store.clone(), reject: "v2" });
        let h = harness_with_videos(store, videos, three_answers(), RecordingNotifier::default());

        let RunOutcome::Processed(summary) = h.coordinator.run("saga", as_of()).await.unwrap() else {
            panic!("expected Processed");
        };
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.candidates, 3);
        assert_eq!(summary.deltas_written, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].video_id, "v2");
        assert_eq!(summary.failures[0].kind, FailureKind::StoreWrite);
        assert!(summary.highlights.iter().all(|d| d.video_id != "v2"));

        let reader = TrialwatchReader::open(&path).unwrap();
        let mut written: Vec<String> = reader
            .deltas("saga", "2026-03-31")
            .unwrap()
            .into_iter()
            .map(|d| d.video_id)
            .collect();
        written.sort();
        assert_eq!(written, vec!["v1", "v3"]);
    }
}

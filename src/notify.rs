use crate::error::ProviderErrorKind;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

/// Terminal state of a processed trigger run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Provider failures exceeded the configured rate; the run is degraded.
    BatchAborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureKind {
    Provider { kind: ProviderErrorKind },
    StoreWrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoFailure {
    pub video_id: String,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeltaHighlight {
    pub video_id: String,
    pub creator: Option<String>,
    pub views: i64,
    pub comments: i64,
    pub likes: i64,
    pub shares: i64,
}

/// Everything a notification about one trigger run needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub app_id: String,
    pub date: NaiveDate,
    pub today_count: u64,
    pub baseline: f64,
    pub margin: f64,
    pub status: RunStatus,
    pub candidates: usize,
    pub deltas_written: usize,
    pub no_baseline: usize,
    pub skipped: usize,
    pub failures: Vec<VideoFailure>,
    /// Largest view gains first.
    pub highlights: Vec<DeltaHighlight>,
}

impl RunSummary {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

/// Receives the summary once a triggered run has committed its writes.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, summary: &RunSummary) -> anyhow::Result<()>;
}

/// Emits the summary as structured log events.
pub struct TracingNotifier;

#[async_trait]
impl NotificationDispatcher for TracingNotifier {
    async fn notify(&self, summary: &RunSummary) -> anyhow::Result<()> {
        tracing::info!(
            run_id = summary.run_id.as_str(),
            app_id = summary.app_id.as_str(),
            date = %summary.date,
            status = ?summary.status,
            today_count = summary.today_count,
            baseline = summary.baseline,
            deltas = summary.deltas_written,
            failures = summary.failure_count(),
            skipped = summary.skipped,
            "trial spike processed"
        );
        for h in &summary.highlights {
            tracing::info!(
                run_id = summary.run_id.as_str(),
                video_id = h.video_id.as_str(),
                creator = h.creator.as_deref().unwrap_or("-"),
                views = h.views,
                comments = h.comments,
                likes = h.likes,
                shares = h.shares,
                "video delta"
            );
        }
        for f in &summary.failures {
            tracing::warn!(
                run_id = summary.run_id.as_str(),
                video_id = f.video_id.as_str(),
                kind = ?f.kind,
                error = f.message.as_str(),
                "video not refreshed"
            );
        }
        Ok(())
    }
}

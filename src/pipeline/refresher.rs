use crate::config::RefreshConfig;
use crate::error::ProviderErrorKind;
use crate::model::VideoRecord;
use crate::provider::MetricsProvider;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-video result of one refresh batch.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshResult {
    Success {
        previous: VideoRecord,
        current: VideoRecord,
    },
    Failed {
        video_id: String,
        kind: ProviderErrorKind,
        message: String,
    },
    /// Never requested because the batch was aborted first.
    Skipped { video_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshBatch {
    pub results: Vec<RefreshResult>,
    /// Failure rate exceeded `max_failure_rate`; later candidates were skipped.
    pub aborted: bool,
}

impl RefreshBatch {
    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, RefreshResult::Failed { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, RefreshResult::Skipped { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    pub concurrency: usize,
    pub max_failure_rate: f64,
}

impl From<&RefreshConfig> for RefreshPolicy {
    fn from(config: &RefreshConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            max_failure_rate: config.max_failure_rate,
        }
    }
}

/// Fetches current metrics for candidate videos with bounded concurrency.
pub struct VideoMetricsRefresher {
    provider: Arc<dyn MetricsProvider>,
    policy: RefreshPolicy,
}

impl VideoMetricsRefresher {
    pub fn new(provider: Arc<dyn MetricsProvider>, policy: RefreshPolicy) -> Self {
        Self { provider, policy }
    }

    /// Refresh every candidate. Provider failures are per-video; once they
    /// exceed `max_failure_rate` of the batch no new requests start, while
    /// requests already in flight are drained.
    pub async fn refresh(
        &self,
        app_id: &str,
        trigger_date: NaiveDate,
        candidates: Vec<VideoRecord>,
    ) -> RefreshBatch {
        let total = candidates.len();
        let failure_budget = self.policy.max_failure_rate * total as f64;
        let halt = AtomicBool::new(false);
        let halt = &halt;
        let provider = &self.provider;

        let mut pending = stream::iter(candidates)
            .map(move |previous| async move {
                if halt.load(Ordering::SeqCst) {
                    return RefreshResult::Skipped {
                        video_id: previous.video_id,
                    };
                }
                match provider.fetch_metrics(&previous.video_id).await {
                    Ok(fetched) => {
                        let current = VideoRecord {
                            video_id: previous.video_id.clone(),
                            app_id: previous.app_id.clone(),
                            observed_at: trigger_date,
                            creator: fetched.creator.or_else(|| previous.creator.clone()),
                            metrics: Some(fetched.metrics),
                        };
                        RefreshResult::Success { previous, current }
                    }
                    Err(err) => RefreshResult::Failed {
                        video_id: previous.video_id,
                        kind: err.kind,
                        message: err.message,
                    },
                }
            })
            .buffer_unordered(self.policy.concurrency);

        let mut results = Vec::with_capacity(total);
        let mut failures = 0usize;
        while let Some(result) = pending.next().await {
            if let RefreshResult::Failed { video_id, kind, message } = &result {
                failures += 1;
                tracing::warn!(app_id, video_id = video_id.as_str(), ?kind, error = message.as_str(), "metrics fetch failed");
                if failures as f64 > failure_budget && !halt.swap(true, Ordering::SeqCst) {
                    tracing::error!(
                        app_id,
                        failures,
                        candidates = total,
                        provider = self.provider.name(),
                        "failure rate exceeded, aborting refresh batch"
                    );
                }
            }
            results.push(result);
        }

        RefreshBatch {
            results,
            aborted: halt.load(Ordering::SeqCst),
        }
    }
}

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod provider;
pub mod store;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use config::Config;
use notify::NotificationDispatcher;
use pipeline::{
    DeltaComputer, PipelineCoordinator, RefreshPolicy, TriggerLedger, TrialAnalyzer,
    VideoMetricsRefresher,
};
use provider::{ApifyProvider, MetricsProvider, RetryPolicy, RetryingProvider};
use store::SqliteStore;

/// Wire a coordinator from config: one SQLite store behind every store
/// trait, the Apify provider wrapped in the configured retry policy.
pub fn build_coordinator(
    config: &Config,
    store: Arc<SqliteStore>,
    notifier: Arc<dyn NotificationDispatcher>,
) -> Result<PipelineCoordinator> {
    let apify = ApifyProvider::new(
        &config.provider,
        Duration::from_secs(config.refresh.request_timeout_secs),
    )?;
    let provider: Arc<dyn MetricsProvider> = Arc::new(RetryingProvider::new(
        apify,
        RetryPolicy::from(&config.refresh.retry),
    ));

    Ok(PipelineCoordinator::new(
        TrialAnalyzer::new(store.clone(), config.analyzer.clone()),
        TriggerLedger::new(store.clone()),
        store.clone(),
        VideoMetricsRefresher::new(provider, RefreshPolicy::from(&config.refresh)),
        DeltaComputer::new(store),
        notifier,
        config.refresh.candidate_window_days,
    ))
}

use chrono::NaiveDate;
use thiserror::Error;

/// Failures from the SQLite-backed stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Store task did not complete: {0}")]
    Blocking(#[from] tokio::task::JoinError),
    #[error("Corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },
}

/// Classification of a metrics-provider failure for one video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Timeout,
    RateLimited,
    Server,
    Transport,
    /// Non-retryable client-side rejection (auth, not found, bad input).
    Rejected,
    Malformed,
    UnsupportedUrl,
}

impl ProviderErrorKind {
    /// Whether a repeated attempt could plausibly succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited | Self::Server | Self::Transport
        )
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind:?} fetching metrics for {video_id}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub video_id: String,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, video_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            video_id: video_id.to_string(),
            message: message.into(),
        }
    }
}

/// Run-level failures surfaced by the pipeline coordinator.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("store failure for app {app_id} on {date}: {source}")]
    Store {
        app_id: String,
        date: NaiveDate,
        #[source]
        source: StoreError,
    },
}

pub mod reader;
pub mod schema;
pub mod sqlite;

use crate::error::StoreError;
use crate::model::{DateRange, TrialCountRecord, TriggerEvent, VideoMetricDelta, VideoRecord};
use async_trait::async_trait;
use chrono::NaiveDate;

pub use reader::TrialwatchReader;
pub use sqlite::SqliteStore;

/// Read-only view over trial-count and video history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Trial-count records for `app_id` whose day falls in `range`, ascending by day.
    async fn trial_counts(
        &self,
        app_id: &str,
        range: DateRange,
    ) -> Result<Vec<TrialCountRecord>, StoreError>;

    /// Latest snapshot per video for `app_id` observed within `range`.
    async fn video_records(
        &self,
        app_id: &str,
        range: DateRange,
    ) -> Result<Vec<VideoRecord>, StoreError>;
}

/// Result of a conditional insert keyed by `(app_id, date)`.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(TriggerEvent),
    /// A row already existed; carries the stored event, not the candidate.
    Existing(TriggerEvent),
}

/// Backing store for the trigger ledger.
///
/// `insert_if_absent` must be a single atomic conditional write at the
/// storage layer.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn insert_if_absent(&self, event: &TriggerEvent) -> Result<InsertOutcome, StoreError>;

    async fn find(&self, app_id: &str, date: NaiveDate) -> Result<Option<TriggerEvent>, StoreError>;
}

/// Write side for refreshed snapshots and their deltas.
#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Append `snapshot` as the video's current record and, when given, the
    /// delta against the previous one. Either both land or neither does.
    async fn commit_refresh(
        &self,
        snapshot: &VideoRecord,
        delta: Option<&VideoMetricDelta>,
    ) -> Result<(), StoreError>;
}

pub(crate) const DATE_FMT: &str = "%Y-%m-%d";

pub(crate) fn format_day(day: NaiveDate) -> String {
    day.format(DATE_FMT).to_string()
}

pub(crate) fn parse_day(table: &'static str, raw: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(raw, DATE_FMT).map_err(|e| StoreError::Corrupt {
        table,
        detail: format!("bad date {raw:?}: {e}"),
    })
}

pub(crate) fn to_sql_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn from_sql_count(table: &'static str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt {
        table,
        detail: format!("negative count {value}"),
    })
}

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

/// A read-only view of the trialwatch database for reporting.
///
/// Opens a separate read-only SQLite connection so that reports never
/// contend with a pipeline run writing through `SqliteStore` (WAL mode
/// allows this).
pub struct TrialwatchReader {
    conn: Connection,
}

/// Trigger event row for the `triggers` report.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TriggerEventRow {
    pub app_id: String,
    pub trigger_date: String,
    pub today_count: i64,
    pub baseline_median: f64,
    pub margin: f64,
    pub mode: String,
    pub created_at: String,
}

/// Delta row for the `deltas` report.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeltaRow {
    pub video_id: String,
    pub creator: Option<String>,
    pub old_views: i64,
    pub new_views: i64,
    pub delta_views: i64,
    pub old_comments: i64,
    pub new_comments: i64,
    pub delta_comments: i64,
    pub old_likes: i64,
    pub new_likes: i64,
    pub delta_likes: i64,
    pub old_shares: i64,
    pub new_shares: i64,
    pub delta_shares: i64,
    pub logged_at: String,
}

impl TrialwatchReader {
    /// Open a read-only connection to the trialwatch database.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            db_path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("opening trialwatch db read-only: {}", db_path.display()))?;
        Ok(Self { conn })
    }

    /// Most recent trigger events for `app_id`, newest first.
    pub fn triggers(&self, app_id: &str, limit: usize) -> Result<Vec<TriggerEventRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT app_id, trigger_date, today_count, baseline_median, margin, mode, created_at
             FROM trigger_events
             WHERE app_id = ?1
             ORDER BY trigger_date DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(rusqlite::params![app_id, limit as i64], |row| {
            Ok(TriggerEventRow {
                app_id: row.get(0)?,
                trigger_date: row.get(1)?,
                today_count: row.get(2)?,
                baseline_median: row.get(3)?,
                margin: row.get(4)?,
                mode: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Deltas recorded for the trigger on `trigger_date` (`YYYY-MM-DD`).
    pub fn deltas(&self, app_id: &str, trigger_date: &str) -> Result<Vec<DeltaRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT video_id, creator,
                    old_views, new_views, delta_views,
                    old_comments, new_comments, delta_comments,
                    old_likes, new_likes, delta_likes,
                    old_shares, new_shares, delta_shares,
                    logged_at
             FROM video_metric_deltas
             WHERE app_id = ?1 AND trigger_date = ?2
             ORDER BY delta_views DESC, video_id ASC",
        )?;

        let rows = stmt.query_map(rusqlite::params![app_id, trigger_date], |row| {
            Ok(DeltaRow {
                video_id: row.get(0)?,
                creator: row.get(1)?,
                old_views: row.get(2)?,
                new_views: row.get(3)?,
                delta_views: row.get(4)?,
                old_comments: row.get(5)?,
                new_comments: row.get(6)?,
                delta_comments: row.get(7)?,
                old_likes: row.get(8)?,
                new_likes: row.get(9)?,
                delta_likes: row.get(10)?,
                old_shares: row.get(11)?,
                new_shares: row.get(12)?,
                delta_shares: row.get(13)?,
                logged_at: row.get(14)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

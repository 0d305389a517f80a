use crate::error::StoreError;
use crate::model::{
    DateRange, EngagementMetrics, TrialCountRecord, TriggerEvent, VideoMetricDelta, VideoRecord,
};
use crate::store::{
    format_day, from_sql_count, parse_day, schema, to_sql_count, HistoryStore, InsertOutcome,
    TriggerStore, VideoStore,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// SQLite-backed implementation of every store the pipeline talks to.
///
/// Trait calls run on tokio's blocking pool and are serialized through one
/// connection. Cross-process exclusion comes from SQLite itself (WAL, busy
/// timeout and UNIQUE keys).
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

type SnapshotRow = (
    String,
    String,
    String,
    Option<String>,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    Option<i64>,
);

impl SqliteStore {
    /// Open (or create) the database at `db_path`, creating parent dirs.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database dir: {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("opening trialwatch db: {}", db_path.display()))?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: Some(db_path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory db")?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: None,
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch(schema::PRAGMAS)
            .context("trialwatch PRAGMA setup")?;
        for ddl in schema::ALL_DDL {
            conn.execute_batch(ddl).context("trialwatch DDL")?;
        }
        Ok(())
    }

    /// Path to the underlying database file, `None` for in-memory stores.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run `f` against the connection off the async worker threads.
    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&mut *conn.lock())).await?
    }

    /// Upsert one day's trial count. Used by ingestion and fixtures.
    pub fn record_trial_count(&self, app_id: &str, day: NaiveDate, count: u64) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO trial_counts (app_id, day, count) VALUES (?1, ?2, ?3)
             ON CONFLICT(app_id, day) DO UPDATE SET count = excluded.count",
            params![app_id, format_day(day), to_sql_count(count)],
        )?;
        Ok(())
    }

    /// Append a snapshot outside of a refresh run (initial registration).
    pub fn record_snapshot(&self, record: &VideoRecord) -> Result<(), StoreError> {
        insert_snapshot(&self.conn.lock(), record)
    }
}

fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn insert_snapshot(conn: &Connection, r: &VideoRecord) -> Result<(), StoreError> {
    let m = r.metrics;
    conn.execute(
        "INSERT INTO video_snapshots (
            video_id, app_id, observed_at, creator, views, comments, likes, shares, logged_at
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
        params![
            r.video_id,
            r.app_id,
            format_day(r.observed_at),
            r.creator,
            m.map(|m| to_sql_count(m.views)),
            m.map(|m| to_sql_count(m.comments)),
            m.map(|m| to_sql_count(m.likes)),
            m.map(|m| to_sql_count(m.shares)),
            now_ts(),
        ],
    )?;
    Ok(())
}

fn insert_delta(conn: &Connection, d: &VideoMetricDelta) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO video_metric_deltas (
            app_id, trigger_date, video_id, creator,
            old_views, new_views, delta_views,
            old_comments, new_comments, delta_comments,
            old_likes, new_likes, delta_likes,
            old_shares, new_shares, delta_shares,
            logged_at
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
        params![
            d.app_id,
            format_day(d.trigger_date),
            d.video_id,
            d.creator,
            to_sql_count(d.old.views),
            to_sql_count(d.new.views),
            d.delta.views,
            to_sql_count(d.old.comments),
            to_sql_count(d.new.comments),
            d.delta.comments,
            to_sql_count(d.old.likes),
            to_sql_count(d.new.likes),
            d.delta.likes,
            to_sql_count(d.old.shares),
            to_sql_count(d.new.shares),
            d.delta.shares,
            now_ts(),
        ],
    )?;
    Ok(())
}

fn find_trigger(
    conn: &Connection,
    app_id: &str,
    date: NaiveDate,
) -> Result<Option<TriggerEvent>, StoreError> {
    let row = conn
        .query_row(
            "SELECT today_count, baseline_median, margin, mode, created_at
             FROM trigger_events WHERE app_id = ?1 AND trigger_date = ?2",
            params![app_id, format_day(date)],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;
    row.map(|(today, baseline, margin, mode, created_at)| -> Result<TriggerEvent, StoreError> {
        Ok(TriggerEvent {
            app_id: app_id.to_string(),
            date,
            today_count: from_sql_count("trigger_events", today)?,
            baseline_median: baseline,
            margin,
            mode,
            created_at,
        })
    })
    .transpose()
}

fn snapshot_from_row(row: SnapshotRow) -> Result<VideoRecord, StoreError> {
    let (video_id, app_id, observed_at, creator, views, comments, likes, shares) = row;
    let metrics = match (views, comments, likes, shares) {
        (Some(v), Some(c), Some(l), Some(s)) => Some(EngagementMetrics {
            views: from_sql_count("video_snapshots", v)?,
            comments: from_sql_count("video_snapshots", c)?,
            likes: from_sql_count("video_snapshots", l)?,
            shares: from_sql_count("video_snapshots", s)?,
        }),
        // Partially measured snapshots give no usable baseline.
        _ => None,
    };
    Ok(VideoRecord {
        video_id,
        app_id,
        observed_at: parse_day("video_snapshots", &observed_at)?,
        creator,
        metrics,
    })
}

fn query_trial_counts(
    conn: &Connection,
    app_id: &str,
    range: DateRange,
) -> Result<Vec<TrialCountRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT day, count FROM trial_counts
         WHERE app_id = ?1 AND day >= ?2 AND day <= ?3
         ORDER BY day ASC",
    )?;
    let rows = stmt.query_map(
        params![app_id, format_day(range.start), format_day(range.end)],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
    )?;

    let mut results = Vec::new();
    for row in rows {
        let (day, count) = row?;
        results.push(TrialCountRecord {
            app_id: app_id.to_string(),
            date: parse_day("trial_counts", &day)?,
            count: from_sql_count("trial_counts", count)?,
        });
    }
    Ok(results)
}

/// Latest snapshot per video observed inside `range` for one app.
fn query_video_records(
    conn: &Connection,
    app_id: &str,
    range: DateRange,
) -> Result<Vec<VideoRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT s.video_id, s.app_id, s.observed_at, s.creator,
                s.views, s.comments, s.likes, s.shares
         FROM video_snapshots s
         WHERE s.app_id = ?1 AND s.observed_at >= ?2 AND s.observed_at <= ?3
           AND s.id = (
               SELECT MAX(t.id) FROM video_snapshots t
               WHERE t.video_id = s.video_id AND t.app_id = s.app_id
                 AND t.observed_at >= ?2 AND t.observed_at <= ?3
           )
         ORDER BY s.video_id ASC",
    )?;
    let rows = stmt.query_map(
        params![app_id, format_day(range.start), format_day(range.end)],
        |row| -> rusqlite::Result<SnapshotRow> {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            ))
        },
    )?;

    let mut results = Vec::new();
    for row in rows {
        results.push(snapshot_from_row(row?)?);
    }
    Ok(results)
}

fn insert_trigger_if_absent(
    conn: &Connection,
    event: TriggerEvent,
) -> Result<InsertOutcome, StoreError> {
    let inserted = conn.execute(
        "INSERT INTO trigger_events (
            app_id, trigger_date, today_count, baseline_median, margin, mode, created_at
        ) VALUES (?1,?2,?3,?4,?5,?6,?7)
        ON CONFLICT(app_id, trigger_date) DO NOTHING",
        params![
            event.app_id,
            format_day(event.date),
            to_sql_count(event.today_count),
            event.baseline_median,
            event.margin,
            event.mode,
            event.created_at,
        ],
    )?;
    if inserted == 1 {
        return Ok(InsertOutcome::Inserted(event));
    }
    match find_trigger(conn, &event.app_id, event.date)? {
        Some(existing) => Ok(InsertOutcome::Existing(existing)),
        None => Err(StoreError::Corrupt {
            table: "trigger_events",
            detail: format!(
                "conflicting row for {}/{} vanished",
                event.app_id, event.date
            ),
        }),
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn trial_counts(
        &self,
        app_id: &str,
        range: DateRange,
    ) -> Result<Vec<TrialCountRecord>, StoreError> {
        let app_id = app_id.to_string();
        self.blocking(move |conn| query_trial_counts(conn, &app_id, range))
            .await
    }

    async fn video_records(
        &self,
        app_id: &str,
        range: DateRange,
    ) -> Result<Vec<VideoRecord>, StoreError> {
        let app_id = app_id.to_string();
        self.blocking(move |conn| query_video_records(conn, &app_id, range))
            .await
    }
}

#[async_trait]
impl TriggerStore for SqliteStore {
    async fn insert_if_absent(&self, event: &TriggerEvent) -> Result<InsertOutcome, StoreError> {
        let event = event.clone();
        self.blocking(move |conn| insert_trigger_if_absent(conn, event))
            .await
    }

    async fn find(&self, app_id: &str, date: NaiveDate) -> Result<Option<TriggerEvent>, StoreError> {
        let app_id = app_id.to_string();
        self.blocking(move |conn| find_trigger(conn, &app_id, date))
            .await
    }
}

#[async_trait]
impl VideoStore for SqliteStore {
    async fn commit_refresh(
        &self,
        snapshot: &VideoRecord,
        delta: Option<&VideoMetricDelta>,
    ) -> Result<(), StoreError> {
        let snapshot = snapshot.clone();
        let delta = delta.cloned();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            insert_snapshot(&tx, &snapshot)?;
            if let Some(delta) = &delta {
                insert_delta(&tx, delta)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

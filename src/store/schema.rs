// DDL constants for the trialwatch database.

pub const TRIAL_COUNTS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS trial_counts (
    app_id      TEXT    NOT NULL,
    day         TEXT    NOT NULL,
    count       INTEGER NOT NULL CHECK (count >= 0),
    PRIMARY KEY (app_id, day)
);
";

/// The UNIQUE constraint is what makes trigger recording idempotent across
/// concurrent invocations.
pub const TRIGGER_EVENTS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS trigger_events (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    app_id          TEXT    NOT NULL,
    trigger_date    TEXT    NOT NULL,
    today_count     INTEGER NOT NULL,
    baseline_median REAL    NOT NULL,
    margin          REAL    NOT NULL,
    mode            TEXT    NOT NULL,
    created_at      TEXT    NOT NULL,
    UNIQUE (app_id, trigger_date)
);
";

pub const VIDEO_SNAPSHOTS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS video_snapshots (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    video_id    TEXT    NOT NULL,
    app_id      TEXT    NOT NULL,
    observed_at TEXT    NOT NULL,
    creator     TEXT,
    views       INTEGER,
    comments    INTEGER,
    likes       INTEGER,
    shares      INTEGER,
    logged_at   TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_vs_app_day ON video_snapshots(app_id, observed_at);
CREATE INDEX IF NOT EXISTS idx_vs_video   ON video_snapshots(video_id);
";

pub const VIDEO_METRIC_DELTAS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS video_metric_deltas (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    app_id          TEXT    NOT NULL,
    trigger_date    TEXT    NOT NULL,
    video_id        TEXT    NOT NULL,
    creator         TEXT,
    old_views       INTEGER NOT NULL,
    new_views       INTEGER NOT NULL,
    delta_views     INTEGER NOT NULL,
    old_comments    INTEGER NOT NULL,
    new_comments    INTEGER NOT NULL,
    delta_comments  INTEGER NOT NULL,
    old_likes       INTEGER NOT NULL,
    new_likes       INTEGER NOT NULL,
    delta_likes     INTEGER NOT NULL,
    old_shares      INTEGER NOT NULL,
    new_shares      INTEGER NOT NULL,
    delta_shares    INTEGER NOT NULL,
    logged_at       TEXT    NOT NULL,
    UNIQUE (app_id, trigger_date, video_id),
    FOREIGN KEY (app_id, trigger_date) REFERENCES trigger_events(app_id, trigger_date)
);
";

pub const PRAGMAS: &str = "\
PRAGMA busy_timeout = 5000;
PRAGMA journal_mode = WAL;
PRAGMA synchronous  = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA temp_store   = MEMORY;
";

/// All table DDL in dependency order.
pub const ALL_DDL: [&str; 4] = [
    TRIAL_COUNTS_DDL,
    TRIGGER_EVENTS_DDL,
    VIDEO_SNAPSHOTS_DDL,
    VIDEO_METRIC_DELTAS_DDL,
];

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn ddl_executes_on_in_memory_db() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(PRAGMAS).unwrap();
        for ddl in ALL_DDL {
            conn.execute_batch(ddl).unwrap();
        }
    }

    #[test]
    fn ddl_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(PRAGMAS).unwrap();
        // Execute twice to verify IF NOT EXISTS
        for ddl in ALL_DDL.iter().chain(ALL_DDL.iter()) {
            conn.execute_batch(ddl).unwrap();
        }
    }

    #[test]
    fn trigger_uniqueness_is_enforced_by_the_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(TRIGGER_EVENTS_DDL).unwrap();
        let insert = "INSERT INTO trigger_events
            (app_id, trigger_date, today_count, baseline_median, margin, mode, created_at)
            VALUES ('saga', '2026-03-01', 40, 10.0, 30.0, 'relative', 'now')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}

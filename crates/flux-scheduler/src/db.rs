use rusqlite::Connection;

use crate::error::Result;

/// Initialises the scheduler schema. Jobs are persisted to SQLite rather
/// than a JSON file (see the crate-level design note); `next_run` is
/// indexed since the tick loop's polling query runs every minute.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;

        CREATE TABLE IF NOT EXISTS jobs (
            id          TEXT    NOT NULL PRIMARY KEY,
            description TEXT    NOT NULL,
            schedule    TEXT    NOT NULL,
            task        TEXT    NOT NULL,
            enabled     INTEGER NOT NULL DEFAULT 1,
            next_run    TEXT,
            last_run    TEXT,
            run_count   INTEGER NOT NULL DEFAULT 0,
            history     TEXT    NOT NULL DEFAULT '[]',
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_jobs_next_run ON jobs (next_run);",
    )?;
    Ok(())
}

use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `scheduled_jobs`, `job_groups` and `scheduler_state` tables
/// (idempotent) and an index serving both the due query and the watermark
/// `MIN(next_run)` scan.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scheduled_jobs (
            id          TEXT    NOT NULL PRIMARY KEY,
            name        TEXT    NOT NULL,
            handler     TEXT    NOT NULL,   -- HandlerRegistry key
            group_name  TEXT,               -- NULL means no owning group
            rule        TEXT    NOT NULL,   -- JSON-encoded RecurrenceRule
            active      INTEGER NOT NULL DEFAULT 1,
            next_run    INTEGER NOT NULL,   -- Unix seconds, claim guard
            last_run    INTEGER,            -- Unix seconds or NULL
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        ) STRICT;

        -- SELECT … WHERE active = 1 AND next_run < ?  ORDER BY next_run
        CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_due
            ON scheduled_jobs (active, next_run);

        -- Groups absent from this table count as enabled.
        CREATE TABLE IF NOT EXISTS job_groups (
            name        TEXT    NOT NULL PRIMARY KEY,
            enabled     INTEGER NOT NULL DEFAULT 1
        ) STRICT;

        -- Small key/value cache (dispatch watermark).
        CREATE TABLE IF NOT EXISTS scheduler_state (
            key         TEXT    NOT NULL PRIMARY KEY,
            value       INTEGER NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode};
use tracing::{debug, instrument, warn};

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::rule::RecurrenceRule;
use crate::store::JobStore;
use crate::types::Job;

const WATERMARK_KEY: &str = "dispatch_watermark";
/// How long a writer waits for another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Expands to a job SELECT (with the derived `group_enabled` column)
/// followed by `$tail`.
macro_rules! select_jobs {
    ($tail:literal) => {
        concat!(
            "SELECT j.id, j.name, j.handler, j.group_name, j.rule, j.active,
                    COALESCE(g.enabled, 1), j.next_run, j.last_run, j.created_at
             FROM scheduled_jobs j
             LEFT JOIN job_groups g ON g.name = j.group_name ",
            $tail
        )
    };
}

/// [`JobStore`] backed by a SQLite database.
///
/// Several `SqliteStore`s (in one process or many) may open the same file;
/// the claim is a conditional `UPDATE` so they never double-claim an instant.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open (or create) the database file at `path` in WAL mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        debug!(path = %path.as_ref().display(), "scheduler database opened");
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave the connection half-written:
        // every statement is its own implicit transaction.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a job query. Rows whose rule cannot be used are left out and
    /// deactivated, so they stop counting towards the watermark too.
    fn query_jobs(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut jobs = Vec::new();
        let mut unusable = Vec::new();
        {
            let mut stmt = conn.prepare_cached(sql)?;
            let rows = stmt.query_map(params, row_to_job)?;
            for row in rows {
                match row {
                    Ok(job) => jobs.push(job),
                    Err(rusqlite::Error::FromSqlConversionFailure(idx, ty, e)) => {
                        match e.downcast::<UnusableRule>() {
                            Ok(bad) => unusable.push(*bad),
                            Err(e) => {
                                return Err(rusqlite::Error::FromSqlConversionFailure(idx, ty, e).into())
                            }
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        for bad in unusable {
            warn!(job_id = %bad.id, reason = %bad.reason, "deactivating job with unusable rule");
            conn.execute(
                "UPDATE scheduled_jobs SET active = 0, updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), bad.id],
            )?;
        }
        Ok(jobs)
    }

    fn expect_one(changed: usize, id: &str) -> Result<()> {
        if changed == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }
}

impl JobStore for SqliteStore {
    #[instrument(skip_all, fields(job_id = %job.id))]
    fn insert_job(&self, job: &Job) -> Result<()> {
        job.rule.validate()?;
        let rule_json = serde_json::to_string(&job.rule)?;
        let conn = self.conn();
        let res = conn.execute(
            "INSERT INTO scheduled_jobs
             (id, name, handler, group_name, rule, active, next_run, last_run,
              created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?9)",
            params![
                job.id,
                job.name,
                job.handler,
                job.group,
                rule_json,
                job.active,
                job.next_run,
                job.last_run,
                job.created_at
            ],
        );
        match res {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(SchedulerError::DuplicateJob { id: job.id.clone() })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn remove_job(&self, id: &str) -> Result<()> {
        let n = self
            .conn()
            .execute("DELETE FROM scheduled_jobs WHERE id = ?1", [id])?;
        Self::expect_one(n, id)
    }

    fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let n = self.conn().execute(
            "UPDATE scheduled_jobs SET active = ?1, updated_at = ?2 WHERE id = ?3",
            params![active, Utc::now().to_rfc3339(), id],
        )?;
        Self::expect_one(n, id)
    }

    fn set_group_enabled(&self, group: &str, enabled: bool) -> Result<()> {
        self.conn().execute(
            "INSERT INTO job_groups (name, enabled) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET enabled = excluded.enabled",
            params![group, enabled],
        )?;
        Ok(())
    }

    fn set_rule(&self, id: &str, rule: &RecurrenceRule) -> Result<()> {
        rule.validate()?;
        let rule_json = serde_json::to_string(rule)?;
        let n = self.conn().execute(
            "UPDATE scheduled_jobs SET rule = ?1, updated_at = ?2 WHERE id = ?3",
            params![rule_json, Utc::now().to_rfc3339(), id],
        )?;
        Self::expect_one(n, id)
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn();
        match conn.query_row(select_jobs!("WHERE j.id = ?1"), [id], row_to_job) {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        self.query_jobs(select_jobs!("ORDER BY j.next_run, j.id"), [])
    }

    fn list_active_jobs(&self) -> Result<Vec<Job>> {
        self.query_jobs(
            select_jobs!(
                "WHERE j.active = 1 AND COALESCE(g.enabled, 1) = 1
                 ORDER BY j.next_run, j.id"
            ),
            [],
        )
    }

    fn due_jobs(&self, now: i64) -> Result<Vec<Job>> {
        self.query_jobs(
            select_jobs!(
                "WHERE j.active = 1 AND COALESCE(g.enabled, 1) = 1 AND j.next_run < ?1
                 ORDER BY j.next_run, j.id"
            ),
            [now],
        )
    }

    fn compare_and_set_next_run(
        &self,
        id: &str,
        expected: i64,
        new: i64,
        claimed_at: i64,
    ) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE scheduled_jobs SET next_run = ?1, last_run = ?2
             WHERE id = ?3 AND next_run = ?4",
            params![new, claimed_at, id, expected],
        )?;
        Ok(n == 1)
    }

    fn min_active_next_run(&self) -> Result<Option<i64>> {
        let min = self.conn().query_row(
            "SELECT MIN(j.next_run)
             FROM scheduled_jobs j
             LEFT JOIN job_groups g ON g.name = j.group_name
             WHERE j.active = 1 AND COALESCE(g.enabled, 1) = 1",
            [],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(min)
    }

    fn load_watermark(&self) -> Result<Option<i64>> {
        let conn = self.conn();
        match conn.query_row(
            "SELECT value FROM scheduler_state WHERE key = ?1",
            [WATERMARK_KEY],
            |row| row.get::<_, i64>(0),
        ) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store_watermark(&self, value: i64) -> Result<()> {
        self.conn().execute(
            "INSERT INTO scheduler_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![WATERMARK_KEY, value],
        )?;
        Ok(())
    }

    fn rebuild_watermark(&self, never: i64) -> Result<i64> {
        let value = self.conn().query_row(
            "INSERT INTO scheduler_state (key, value)
             SELECT ?1, COALESCE(MIN(j.next_run), ?2)
             FROM scheduled_jobs j
             LEFT JOIN job_groups g ON g.name = j.group_name
             WHERE j.active = 1 AND COALESCE(g.enabled, 1) = 1
             ON CONFLICT(key) DO UPDATE SET value = excluded.value
             RETURNING value",
            params![WATERMARK_KEY, never],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(value)
    }
}

/// Decode failure for a stored rule, carried through
/// `FromSqlConversionFailure` so queries can tell which row to deactivate.
#[derive(Debug, thiserror::Error)]
#[error("job {id} has an unusable rule: {reason}")]
struct UnusableRule {
    id: String,
    reason: String,
}

/// Map a SQLite row to a `Job`. A rule that does not decode, or decodes with
/// out-of-range values, surfaces as `FromSqlConversionFailure` wrapping
/// [`UnusableRule`].
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let id: String = row.get(0)?;
    let rule_json: String = row.get(4)?;
    let rule = serde_json::from_str::<RecurrenceRule>(&rule_json)
        .map_err(|e| e.to_string())
        .and_then(|rule| rule.validate().map(|()| rule).map_err(|e| e.to_string()))
        .map_err(|reason| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                Box::new(UnusableRule {
                    id: id.clone(),
                    reason,
                }),
            )
        })?;
    Ok(Job {
        id,
        name: row.get(1)?,
        handler: row.get(2)?,
        group: row.get(3)?,
        rule,
        active: row.get(5)?,
        group_enabled: row.get(6)?,
        next_run: row.get(7)?,
        last_run: row.get(8)?,
        created_at: row.get(9)?,
    })
}

/// Durable run log for daily jobs.
///
/// One row per `(job_name, run_date)`. The unique index is what makes the
/// very first claim of a day single-winner; the conditional update in
/// [`reclaim`](RunLog::reclaim) makes races over an existing row
/// single-winner too.
///
/// Every operation opens its own short-lived connection, so no transaction
/// ever spans a job's execution time and a long-running job never blocks
/// other writers from reading or heartbeating.
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use daylock_core::{JobRun, JobStatus};

/// Persisted `error_message` is capped at this many characters.
pub const ERROR_MESSAGE_LIMIT: usize = 1000;

const RUN_COLUMNS: &str = "id, job_name, run_date, status, attempt, started_at, finished_at, \
                           last_heartbeat_at, next_retry_at, locked_by, error_message, \
                           created_at, updated_at";

#[derive(Clone)]
pub struct RunLog {
    db_path: String,
}

impl RunLog {
    /// Open the run log at `db_path`, creating the schema if needed.
    pub fn open(db_path: &str) -> Result<Self> {
        let log = Self {
            db_path: db_path.to_string(),
        };
        let conn = log.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS job_runs (
                id                INTEGER PRIMARY KEY,
                job_name          TEXT NOT NULL,
                run_date          TEXT NOT NULL,
                status            TEXT NOT NULL,
                attempt           INTEGER NOT NULL DEFAULT 1,
                started_at        TEXT NOT NULL,
                finished_at       TEXT,
                last_heartbeat_at TEXT,
                next_retry_at     TEXT,
                locked_by         TEXT,
                error_message     TEXT,
                created_at        TEXT NOT NULL,
                updated_at        TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS uq_job_runs_name_date
                ON job_runs(job_name, run_date);
            CREATE INDEX IF NOT EXISTS idx_job_runs_status_retry
                ON job_runs(status, next_retry_at);
            CREATE INDEX IF NOT EXISTS idx_job_runs_run_date
                ON job_runs(run_date);
            "#,
        )?;
        Ok(log)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path).context("open run log")?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Insert a fresh RUNNING row for `(job_name, run_date)`.
    ///
    /// Returns `Ok(None)` when the unique index rejects the insert, meaning
    /// some instance already created the day's row.
    pub fn try_insert_running(
        &self,
        job_name: &str,
        run_date: NaiveDate,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRun>> {
        let conn = self.connect()?;
        let inserted = conn.execute(
            "INSERT INTO job_runs
                 (job_name, run_date, status, attempt, started_at, last_heartbeat_at,
                  locked_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?4, ?5, ?4, ?4)",
            params![
                job_name,
                fmt_date(run_date),
                JobStatus::Running.as_str(),
                fmt_ts(now),
                owner,
            ],
        );
        match inserted {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                self.fetch_by_id(&conn, id)
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(None)
            }
            Err(e) => Err(e).context("insert job run"),
        }
    }

    /// Conditionally take over an existing row, predicated on the exact
    /// `status` and `last_heartbeat_at` values previously read. Only one of
    /// several racing claimants can match the pre-update values; the losers
    /// see zero rows affected and get `Ok(None)`.
    pub fn reclaim(
        &self,
        run: &JobRun,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRun>> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE job_runs SET
                 status = ?1,
                 attempt = attempt + 1,
                 started_at = ?2,
                 last_heartbeat_at = ?2,
                 finished_at = NULL,
                 locked_by = ?3,
                 error_message = NULL,
                 next_retry_at = NULL,
                 updated_at = ?2
             WHERE id = ?4
               AND status = ?5
               AND last_heartbeat_at IS ?6",
            params![
                JobStatus::Running.as_str(),
                fmt_ts(now),
                owner,
                run.id,
                run.status.as_str(),
                run.last_heartbeat_at.map(fmt_ts),
            ],
        )?;
        if changed != 1 {
            return Ok(None);
        }
        self.fetch_by_id(&conn, run.id)
    }

    /// Finalize a run as SUCCESS. Terminal: claim logic never touches the
    /// row again.
    pub fn mark_success(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE job_runs SET
                 status = ?1,
                 finished_at = ?2,
                 last_heartbeat_at = ?2,
                 error_message = NULL,
                 next_retry_at = NULL,
                 updated_at = ?2
             WHERE id = ?3",
            params![JobStatus::Success.as_str(), fmt_ts(now), id],
        )?;
        Ok(())
    }

    /// Finalize a run as FAILED, storing truncated diagnostic text and the
    /// retry schedule computed by the retry policy (`None` = exhausted).
    pub fn mark_failure(
        &self,
        id: i64,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE job_runs SET
                 status = ?1,
                 finished_at = ?2,
                 last_heartbeat_at = ?2,
                 error_message = ?3,
                 next_retry_at = ?4,
                 updated_at = ?2
             WHERE id = ?5",
            params![
                JobStatus::Failed.as_str(),
                fmt_ts(now),
                truncate_error(error),
                next_retry_at.map(fmt_ts),
                id,
            ],
        )?;
        Ok(())
    }

    /// Refresh the liveness timestamp for an active run. Idempotent; carries
    /// no other side effects.
    pub fn heartbeat(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE job_runs SET last_heartbeat_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![fmt_ts(now), id],
        )?;
        Ok(())
    }

    pub fn get(&self, job_name: &str, run_date: NaiveDate) -> Result<Option<JobRun>> {
        let conn = self.connect()?;
        let run = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM job_runs WHERE job_name = ?1 AND run_date = ?2"),
                params![job_name, fmt_date(run_date)],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<JobRun>> {
        let conn = self.connect()?;
        self.fetch_by_id(&conn, id)
    }

    /// Most recent runs for a job, newest run_date first.
    pub fn recent(&self, job_name: &str, limit: usize) -> Result<Vec<JobRun>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM job_runs
             WHERE job_name = ?1
             ORDER BY run_date DESC LIMIT ?2"
        ))?;
        let runs = stmt
            .query_map(params![job_name, limit as i64], run_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn fetch_by_id(&self, conn: &Connection, id: i64) -> Result<Option<JobRun>> {
        let run = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM job_runs WHERE id = ?1"),
                params![id],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }
}

fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn fmt_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn truncate_error(value: &str) -> String {
    value.chars().take(ERROR_MESSAGE_LIMIT).collect()
}

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRun> {
    let status: String = row.get(3)?;
    Ok(JobRun {
        id: row.get(0)?,
        job_name: row.get(1)?,
        run_date: parse_date(row.get::<_, String>(2)?, 2)?,
        status: status
            .parse::<JobStatus>()
            .map_err(|e| conversion_err(3, e))?,
        attempt: row.get::<_, i64>(4)? as u32,
        started_at: parse_ts(row.get::<_, String>(5)?, 5)?,
        finished_at: parse_opt_ts(row.get(6)?, 6)?,
        last_heartbeat_at: parse_opt_ts(row.get(7)?, 7)?,
        next_retry_at: parse_opt_ts(row.get(8)?, 8)?,
        locked_by: row.get(9)?,
        error_message: row.get(10)?,
        created_at: parse_ts(row.get::<_, String>(11)?, 11)?,
        updated_at: parse_ts(row.get::<_, String>(12)?, 12)?,
    })
}

fn parse_date(value: String, idx: usize) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|e| conversion_err(idx, e))
}

fn parse_ts(value: String, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn parse_opt_ts(value: Option<String>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(v, idx)).transpose()
}

fn conversion_err(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

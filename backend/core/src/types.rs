use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DaylockError;

/// Lifecycle state of a single day's run.
///
/// There is no "pending" state: the absence of a row for a
/// `(job_name, run_date)` pair means the day was never attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DaylockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DaylockError::StorageError(format!(
                "unknown job status '{other}'"
            ))),
        }
    }
}

/// One persisted run record. Exactly one row exists per `(job_name, run_date)`;
/// the store's unique index enforces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: i64,
    pub job_name: String,
    /// The calendar day this run covers — the unit of "once per day".
    pub run_date: NaiveDate,
    pub status: JobStatus,
    /// Claim cycles consumed so far for this run_date. Starts at 1 on the
    /// first claim and increments on every successful reclaim, whether the
    /// reclaim took over a stale RUNNING row or retried a FAILED one.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Earliest time a FAILED run becomes reclaimable; None once retries are
    /// exhausted or on success.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// `<hostname>:<pid>` of the instance currently (or last) holding the lease.
    pub locked_by: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [JobStatus::Running, JobStatus::Success, JobStatus::Failed] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("pending".parse::<JobStatus>().is_err());
    }
}

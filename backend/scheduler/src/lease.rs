/// Claim protocol for the daily lease.
///
/// Safety rests entirely on the store: the unique index makes the first
/// insert of a day single-winner, and the predicate-matched conditional
/// update makes contention over an existing row single-winner. No in-process
/// lock is involved, so any number of process instances may call
/// [`claim`](LeaseManager::claim) concurrently against the same database.
use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::debug;

use daylock_core::{JobRun, JobStatus};

use crate::run_log::RunLog;

#[derive(Clone)]
pub struct LeaseManager {
    run_log: RunLog,
    stale_seconds: i64,
    max_retries: u32,
}

impl LeaseManager {
    pub fn new(run_log: RunLog, stale_seconds: i64, max_retries: u32) -> Self {
        Self {
            run_log,
            stale_seconds,
            max_retries,
        }
    }

    /// Try to acquire the exclusive right to execute `job_name` for
    /// `run_date`.
    ///
    /// Returns `Ok(None)` when the day is already done, a live peer holds
    /// the lease, a failed run is not yet retry-eligible, or a concurrent
    /// claimant won the race. None of these are errors.
    pub fn claim(
        &self,
        job_name: &str,
        run_date: NaiveDate,
        owner: &str,
    ) -> Result<Option<JobRun>> {
        let now = Utc::now();
        if let Some(run) = self
            .run_log
            .try_insert_running(job_name, run_date, owner, now)?
        {
            return Ok(Some(run));
        }

        // Insert lost the uniqueness race; contend for the existing row.
        let Some(existing) = self.run_log.get(job_name, run_date)? else {
            debug!(job = job_name, "Row vanished between insert and read");
            return Ok(None);
        };

        if !self.claimable(&existing, now) {
            debug!(
                job = job_name,
                status = %existing.status,
                attempt = existing.attempt,
                "Claim conflict"
            );
            return Ok(None);
        }

        self.run_log.reclaim(&existing, owner, now)
    }

    fn claimable(&self, run: &JobRun, now: DateTime<Utc>) -> bool {
        match run.status {
            // Terminal: the day is done.
            JobStatus::Success => false,
            // A live peer owns the lease; only a stalled heartbeat makes the
            // row a crash-takeover candidate.
            JobStatus::Running => self.is_stale(run.last_heartbeat_at, now),
            // Retry-eligible only below the attempt ceiling and once the
            // backoff window has passed.
            JobStatus::Failed => {
                run.attempt < self.max_retries
                    && run.next_retry_at.map_or(true, |t| now >= t)
            }
        }
    }

    fn is_stale(&self, last_heartbeat: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_heartbeat {
            None => true,
            Some(hb) => now - hb > Duration::seconds(self.stale_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn setup(stale_seconds: i64, max_retries: u32) -> (tempfile::TempDir, RunLog, LeaseManager) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");
        let log = RunLog::open(path.to_str().unwrap()).unwrap();
        let lease = LeaseManager::new(log.clone(), stale_seconds, max_retries);
        (dir, log, lease)
    }

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn first_claim_wins_and_starts_at_attempt_one() {
        let (_dir, _log, lease) = setup(900, 3);
        let run = lease.claim("nightly", day("2025-06-01"), "a:1").unwrap().unwrap();
        assert_eq!(run.attempt, 1);
        assert_eq!(run.status, JobStatus::Running);
        assert_eq!(run.locked_by.as_deref(), Some("a:1"));
    }

    #[test]
    fn concurrent_claims_have_exactly_one_winner() {
        let (_dir, _log, lease) = setup(900, 3);
        let mut handles = Vec::new();
        for i in 0..8 {
            let lease = lease.clone();
            handles.push(std::thread::spawn(move || {
                lease
                    .claim("nightly", day("2025-06-01"), &format!("host:{i}"))
                    .unwrap()
                    .is_some()
            }));
        }
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn live_running_row_is_not_claimable() {
        let (_dir, _log, lease) = setup(900, 3);
        lease.claim("nightly", day("2025-06-01"), "a:1").unwrap().unwrap();
        assert!(lease.claim("nightly", day("2025-06-01"), "b:2").unwrap().is_none());
    }

    #[test]
    fn stale_running_row_is_taken_over() {
        let (_dir, log, lease) = setup(900, 3);
        let run = lease.claim("nightly", day("2025-06-01"), "a:1").unwrap().unwrap();

        // Backdate the heartbeat past the staleness threshold.
        log.heartbeat(run.id, Utc::now() - ChronoDuration::seconds(901)).unwrap();

        let taken = lease.claim("nightly", day("2025-06-01"), "b:2").unwrap().unwrap();
        assert_eq!(taken.attempt, run.attempt + 1);
        assert_eq!(taken.locked_by.as_deref(), Some("b:2"));
        assert_eq!(taken.status, JobStatus::Running);
    }

    #[test]
    fn success_is_terminal_for_claims() {
        let (_dir, log, lease) = setup(900, 3);
        let run = lease.claim("nightly", day("2025-06-01"), "a:1").unwrap().unwrap();
        log.mark_success(run.id, Utc::now()).unwrap();

        for _ in 0..3 {
            assert!(lease.claim("nightly", day("2025-06-01"), "b:2").unwrap().is_none());
        }
    }

    #[test]
    fn failed_row_with_future_retry_is_not_claimable() {
        let (_dir, log, lease) = setup(900, 3);
        let run = lease.claim("nightly", day("2025-06-01"), "a:1").unwrap().unwrap();
        let now = Utc::now();
        log.mark_failure(run.id, "boom", Some(now + ChronoDuration::seconds(300)), now)
            .unwrap();

        assert!(lease.claim("nightly", day("2025-06-01"), "b:2").unwrap().is_none());
    }

    #[test]
    fn failed_row_becomes_claimable_after_backoff() {
        let (_dir, log, lease) = setup(900, 3);
        let run = lease.claim("nightly", day("2025-06-01"), "a:1").unwrap().unwrap();
        let now = Utc::now();
        log.mark_failure(run.id, "boom", Some(now - ChronoDuration::seconds(1)), now)
            .unwrap();

        let retried = lease.claim("nightly", day("2025-06-01"), "b:2").unwrap().unwrap();
        assert_eq!(retried.attempt, 2);
        assert!(retried.error_message.is_none());
        assert!(retried.next_retry_at.is_none());
    }

    #[test]
    fn exhausted_attempts_are_terminally_failed() {
        let (_dir, log, lease) = setup(900, 2);
        let run = lease.claim("nightly", day("2025-06-01"), "a:1").unwrap().unwrap();
        let now = Utc::now();
        log.mark_failure(run.id, "boom", Some(now - ChronoDuration::seconds(1)), now)
            .unwrap();
        let retried = lease.claim("nightly", day("2025-06-01"), "a:1").unwrap().unwrap();
        assert_eq!(retried.attempt, 2);
        log.mark_failure(run.id, "boom again", None, now).unwrap();

        // attempt (2) >= max_retries (2): no more claims this run_date.
        assert!(lease.claim("nightly", day("2025-06-01"), "b:2").unwrap().is_none());
    }
}

use std::sync::Arc;

use anyhow::Result;
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tokio::sync::watch;
use tokio::time::{self, Duration};
use tracing::{error, info, warn};

use daylock_core::{DailyJob, SchedulerConfig, TimezoneMode};

use crate::heartbeat::HeartbeatReporter;
use crate::lease::LeaseManager;
use crate::retry::RetryPolicy;
use crate::run_log::RunLog;

/// Identity recorded in `locked_by`, formatted `<hostname>:<pid>`.
pub fn owner_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}:{}", host, std::process::id())
}

/// Today's run_date, or `None` while the daily cutoff has not been reached.
fn past_cutoff(now: NaiveDateTime, run_after: NaiveTime) -> Option<NaiveDate> {
    if now.time() < run_after {
        None
    } else {
        Some(now.date())
    }
}

/// Polls the daily cutoff, claims the day's lease, and executes the job
/// under a heartbeat.
///
/// Any number of instances may run this loop against the same database; the
/// lease manager guarantees at most one of them executes the job per
/// run_date. Job errors and store errors are contained here and never
/// terminate the loop.
pub struct DailyScheduler {
    config: SchedulerConfig,
    run_log: RunLog,
    lease: LeaseManager,
    retry: RetryPolicy,
    job: Arc<dyn DailyJob>,
    owner: String,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl DailyScheduler {
    pub fn new(config: SchedulerConfig, run_log: RunLog, job: Arc<dyn DailyJob>) -> Self {
        let lease = LeaseManager::new(run_log.clone(), config.stale_seconds, config.max_retries);
        let retry = RetryPolicy::new(config.max_retries, config.retry_seconds);
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            config,
            run_log,
            lease,
            retry,
            job,
            owner: owner_id(),
            stop_tx,
            stop_rx,
        }
    }

    fn schedule_now(&self) -> NaiveDateTime {
        match self.config.timezone_mode {
            TimezoneMode::Utc => Utc::now().naive_utc(),
            TimezoneMode::Local => Local::now().naive_local(),
        }
    }

    /// Perform one claim/execute/finalize cycle.
    ///
    /// Returns `Ok(true)` only when the job was claimed and completed
    /// successfully; `Ok(false)` covers "before cutoff", "claim conflict",
    /// and "claimed but failed".
    pub async fn run_once(&self) -> Result<bool> {
        let Some(run_date) = past_cutoff(self.schedule_now(), self.config.run_after) else {
            return Ok(false);
        };

        let Some(run) = self
            .lease
            .claim(&self.config.job_name, run_date, &self.owner)?
        else {
            return Ok(false);
        };

        info!(
            job = %run.job_name,
            %run_date,
            attempt = run.attempt,
            owner = %self.owner,
            "Running job"
        );

        let mut heartbeat = HeartbeatReporter::new(self.run_log.clone(), self.config.heartbeat_seconds);
        heartbeat.start(run.id);

        // Run the callback on its own task so a panic inside the job body is
        // contained and finalized as an ordinary failure.
        let job = Arc::clone(&self.job);
        let result = match tokio::spawn(async move { job.run().await }).await {
            Ok(result) => result,
            Err(join_err) => Err(anyhow::anyhow!("job panicked: {join_err}")),
        };

        heartbeat.stop().await;

        match result {
            Ok(()) => {
                self.run_log.mark_success(run.id, Utc::now())?;
                info!(job = %run.job_name, %run_date, attempt = run.attempt, "Job completed");
                Ok(true)
            }
            Err(e) => {
                let now = Utc::now();
                let next_retry = self.retry.next_retry_at(run.attempt, now);
                self.run_log
                    .mark_failure(run.id, &format!("{e:#}"), next_retry, now)?;
                warn!(
                    job = %run.job_name,
                    %run_date,
                    attempt = run.attempt,
                    error = %e,
                    retry_at = ?next_retry,
                    "Job failed"
                );
                Ok(false)
            }
        }
    }

    /// Run claim cycles every `poll_seconds` until [`stop`](Self::stop) is
    /// called. Cycle errors (store unreachable and the like) are logged and
    /// the loop continues on the next tick.
    pub async fn run_forever(&self) {
        let poll = Duration::from_secs(self.config.poll_seconds.max(1));
        let mut stop_rx = self.stop_rx.clone();
        info!(job = %self.config.job_name, owner = %self.owner, "Scheduler started");

        while !*stop_rx.borrow() {
            if let Err(e) = self.run_once().await {
                error!(job = %self.config.job_name, error = %e, "Scheduler cycle failed");
            }
            tokio::select! {
                _ = time::sleep(poll) => {}
                _ = stop_rx.changed() => break,
            }
        }

        info!(job = %self.config.job_name, "Scheduler stopped");
    }

    /// Signal `run_forever` to exit after the current cycle.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

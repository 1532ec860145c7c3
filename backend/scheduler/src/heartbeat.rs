/// Background heartbeat — extends the lease while the job body runs.
///
/// One reporter per active run. It shares nothing with the job body: each
/// tick writes `last_heartbeat_at = now` through its own short-lived
/// connection, and a failed write is logged without aborting the run. The
/// reporter is stopped unconditionally, success or failure, before the run
/// is finalized.
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

use crate::run_log::RunLog;

pub struct HeartbeatReporter {
    run_log: RunLog,
    interval: Duration,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatReporter {
    pub fn new(run_log: RunLog, interval_seconds: u64) -> Self {
        Self {
            run_log,
            interval: Duration::from_secs(interval_seconds.max(1)),
            stop_tx: None,
            handle: None,
        }
    }

    /// Begin ticking for the given run. No-op if already started.
    pub fn start(&mut self, job_run_id: i64) {
        if self.handle.is_some() {
            return;
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let run_log = self.run_log.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            // The first tick completes immediately; the claim already set
            // last_heartbeat_at, so skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match run_log.heartbeat(job_run_id, Utc::now()) {
                            Ok(()) => debug!(job_run_id, "Heartbeat tick"),
                            Err(e) => warn!(job_run_id, error = %e, "Heartbeat write failed"),
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
    }

    /// Stop ticking and wait for the background task to exit.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn heartbeat_advances_liveness_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");
        let log = RunLog::open(path.to_str().unwrap()).unwrap();

        let stale = Utc::now() - ChronoDuration::seconds(3600);
        let run = log
            .try_insert_running("nightly", "2025-06-01".parse().unwrap(), "a:1", stale)
            .unwrap()
            .unwrap();

        let mut reporter = HeartbeatReporter::new(log.clone(), 1);
        reporter.start(run.id);
        time::sleep(Duration::from_millis(2500)).await;
        reporter.stop().await;

        let refreshed = log.get_by_id(run.id).unwrap().unwrap();
        let hb = refreshed.last_heartbeat_at.unwrap();
        assert!(hb > stale + ChronoDuration::seconds(3000));

        // Stopped reporter writes nothing further.
        let frozen = refreshed.last_heartbeat_at;
        time::sleep(Duration::from_millis(1500)).await;
        let again = log.get_by_id(run.id).unwrap().unwrap();
        assert_eq!(again.last_heartbeat_at, frozen);
    }
}

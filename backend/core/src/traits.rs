use anyhow::Result;
use async_trait::async_trait;

/// The business work executed under a daily lease.
///
/// The scheduler knows nothing about what the job does. It only observes
/// whether `run` returned `Ok` (the day is done) or `Err` (the run failed
/// and may be retried). Side effects inside the job body are the job's own
/// responsibility; the scheduler guarantees at-most-one-successful run per
/// calendar day, not exactly-once delivery of what the job does.
#[async_trait]
pub trait DailyJob: Send + Sync + 'static {
    /// Human-readable name of this job implementation, for logging.
    fn name(&self) -> &str;

    /// Perform the day's work.
    async fn run(&self) -> Result<()>;
}

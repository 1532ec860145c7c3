pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{parse_run_after, SchedulerConfig, TimezoneMode};
pub use error::DaylockError;
pub use traits::DailyJob;
pub use types::{JobRun, JobStatus};

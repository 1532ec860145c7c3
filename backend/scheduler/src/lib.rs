pub mod heartbeat;
pub mod lease;
pub mod retry;
pub mod run_log;
pub mod scheduler;

pub use heartbeat::HeartbeatReporter;
pub use lease::LeaseManager;
pub use retry::RetryPolicy;
pub use run_log::RunLog;
pub use scheduler::{owner_id, DailyScheduler};

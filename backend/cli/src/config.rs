use anyhow::Result;

use daylock_core::{parse_run_after, SchedulerConfig};

/// Daylock runtime configuration, loaded from `DAYLOCK_*` environment
/// variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Master switch; `run`/`run-once` exit early when false.
    pub enabled: bool,
    /// SQLite database path for the run log.
    pub db_path: String,
    pub job_name: String,
    /// Daily cutoff, `HH:MM[:SS]`.
    pub run_after: String,
    pub poll_seconds: u64,
    pub heartbeat_seconds: u64,
    pub stale_seconds: i64,
    pub retry_seconds: i64,
    pub max_retries: u32,
    /// `local` or `utc`.
    pub timezone_mode: String,
    /// Shell command executed as the job body.
    pub job_command: Option<String>,
    /// Log level fallback when RUST_LOG is unset.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: "daylock.db".to_string(),
            job_name: "daily-intelligence".to_string(),
            run_after: "12:00".to_string(),
            poll_seconds: 30,
            heartbeat_seconds: 30,
            stale_seconds: 900,
            retry_seconds: 300,
            max_retries: 3,
            timezone_mode: "local".to_string(),
            job_command: None,
            log_level: "info".to_string(),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_or("DAYLOCK_ENABLED", defaults.enabled),
            db_path: std::env::var("DAYLOCK_DB").unwrap_or(defaults.db_path),
            job_name: std::env::var("DAYLOCK_JOB_NAME").unwrap_or(defaults.job_name),
            run_after: std::env::var("DAYLOCK_RUN_AFTER").unwrap_or(defaults.run_after),
            poll_seconds: env_or("DAYLOCK_POLL_SECONDS", defaults.poll_seconds),
            heartbeat_seconds: env_or("DAYLOCK_HEARTBEAT_SECONDS", defaults.heartbeat_seconds),
            stale_seconds: env_or("DAYLOCK_STALE_SECONDS", defaults.stale_seconds),
            retry_seconds: env_or("DAYLOCK_RETRY_SECONDS", defaults.retry_seconds),
            max_retries: env_or("DAYLOCK_MAX_RETRIES", defaults.max_retries),
            timezone_mode: std::env::var("DAYLOCK_TZ").unwrap_or(defaults.timezone_mode),
            job_command: std::env::var("DAYLOCK_JOB_COMMAND").ok(),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }

    /// Validate and convert into the scheduler's explicit configuration.
    pub fn scheduler_config(&self) -> Result<SchedulerConfig> {
        Ok(SchedulerConfig {
            job_name: self.job_name.clone(),
            run_after: parse_run_after(&self.run_after)?,
            poll_seconds: self.poll_seconds,
            heartbeat_seconds: self.heartbeat_seconds,
            stale_seconds: self.stale_seconds,
            retry_seconds: self.retry_seconds,
            max_retries: self.max_retries,
            timezone_mode: self.timezone_mode.parse()?,
        })
    }
}

use std::str::FromStr;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::DaylockError;

/// Which clock the daily cutoff and run_date are computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimezoneMode {
    #[default]
    Local,
    Utc,
}

impl FromStr for TimezoneMode {
    type Err = DaylockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(TimezoneMode::Local),
            "utc" => Ok(TimezoneMode::Utc),
            other => Err(DaylockError::ConfigError(format!(
                "timezone mode must be 'local' or 'utc', got '{other}'"
            ))),
        }
    }
}

/// Everything the scheduler needs to run one daily job.
///
/// Passed explicitly into the scheduler and lease manager; there is no
/// process-wide settings singleton.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Logical job identity. Independent jobs never contend with each other.
    pub job_name: String,
    /// Daily cutoff before which no claim is attempted.
    pub run_after: NaiveTime,
    /// Scheduler loop polling interval.
    pub poll_seconds: u64,
    /// Heartbeat tick interval while a run is active.
    pub heartbeat_seconds: u64,
    /// Liveness threshold for crash-takeover of a RUNNING row.
    pub stale_seconds: i64,
    /// Backoff base used by the retry policy.
    pub retry_seconds: i64,
    /// Attempt ceiling after which a day's run is terminally failed.
    pub max_retries: u32,
    pub timezone_mode: TimezoneMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            job_name: "daily-intelligence".to_string(),
            run_after: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            poll_seconds: 30,
            heartbeat_seconds: 30,
            stale_seconds: 900,
            retry_seconds: 300,
            max_retries: 3,
            timezone_mode: TimezoneMode::Local,
        }
    }
}

/// Parse an `HH:MM[:SS]` cutoff string.
pub fn parse_run_after(value: &str) -> Result<NaiveTime, DaylockError> {
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(DaylockError::ConfigError(format!(
            "run_after must be in HH:MM[:SS] format, got '{value}'"
        )));
    }
    let parse_part = |part: &str| -> Result<u32, DaylockError> {
        part.parse().map_err(|_| {
            DaylockError::ConfigError(format!("invalid run_after component in '{value}'"))
        })
    };
    let hour = parse_part(parts[0])?;
    let minute = parse_part(parts[1])?;
    let second = if parts.len() > 2 { parse_part(parts[2])? } else { 0 };
    NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| {
        DaylockError::ConfigError(format!("run_after '{value}' is out of range"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hh_mm() {
        assert_eq!(
            parse_run_after("12:00").unwrap(),
            NaiveTime::from_hms_opt(12, 0, 0).unwrap()
        );
    }

    #[test]
    fn parses_hh_mm_ss() {
        assert_eq!(
            parse_run_after("23:59:59").unwrap(),
            NaiveTime::from_hms_opt(23, 59, 59).unwrap()
        );
    }

    #[test]
    fn rejects_bare_hour_and_garbage() {
        assert!(parse_run_after("12").is_err());
        assert!(parse_run_after("12:xx").is_err());
        assert!(parse_run_after("25:00").is_err());
    }

    #[test]
    fn timezone_mode_parse_is_case_insensitive() {
        assert_eq!("UTC".parse::<TimezoneMode>().unwrap(), TimezoneMode::Utc);
        assert_eq!("Local".parse::<TimezoneMode>().unwrap(), TimezoneMode::Local);
        assert!("berlin".parse::<TimezoneMode>().is_err());
    }
}

//! Retry policy: linear backoff scaled by the attempt number.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Pure decision function applied when a run fails.
///
/// A crash takeover consumes a retry slot exactly like a genuine failure:
/// `attempt` counts claim cycles, not failures, so `max_retries` caps the
/// total number of cycles a run_date may consume.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_seconds: i64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_seconds: i64) -> Self {
        Self {
            max_retries,
            retry_seconds,
        }
    }

    /// Whether a run that just failed its `attempt`-th cycle may try again.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Earliest time the failed run becomes reclaimable, or `None` when
    /// retries are exhausted and the run_date is terminally failed.
    pub fn next_retry_at(&self, attempt: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.should_retry(attempt) {
            return None;
        }
        let scale = i64::from(attempt.max(1));
        Some(now + Duration::seconds(self.retry_seconds * scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_scales_linearly_with_attempt() {
        let policy = RetryPolicy::new(3, 300);
        let now = Utc::now();

        // Failures at attempts 1 and 2 schedule retries; the third is terminal.
        assert_eq!(
            policy.next_retry_at(1, now),
            Some(now + Duration::seconds(300))
        );
        assert_eq!(
            policy.next_retry_at(2, now),
            Some(now + Duration::seconds(600))
        );
        assert_eq!(policy.next_retry_at(3, now), None);
    }

    #[test]
    fn attempt_zero_is_treated_as_one() {
        let policy = RetryPolicy::new(3, 300);
        let now = Utc::now();
        assert_eq!(
            policy.next_retry_at(0, now),
            Some(now + Duration::seconds(300))
        );
    }

    #[test]
    fn exhaustion_at_and_beyond_ceiling() {
        let policy = RetryPolicy::new(3, 300);
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }
}

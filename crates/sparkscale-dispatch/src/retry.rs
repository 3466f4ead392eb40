//! Retry policy with capped exponential backoff.

use std::time::Duration;

/// How many times to try a transient failure, and how long to wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_backoff: Duration,
    /// Upper bound for any delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): the base interval,
    /// doubled per further failure, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let mut delay = self.base_backoff.min(self.max_backoff);
        for _ in 1..attempt {
            delay = (delay * 2).min(self.max_backoff);
        }
        delay
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(2));
    }

    #[test]
    fn backoff_caps_at_max() {
        let policy = RetryPolicy {
            max_attempts: 50,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
        };
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        assert_eq!(policy.backoff(40), Duration::from_secs(8));
    }

    #[test]
    fn retry_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));

        let once = RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        };
        assert!(!once.allows_retry(1));
    }
}

//! Retry policy for compensations and post-commit dispatch.
//!
//! Uses `backon` for exponential backoff. Rollback retries each compensation
//! with this policy; a compensation that still fails is logged and skipped.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Bounded exponential backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry; doubles on every attempt.
    pub min_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Maximum number of retries after the first attempt. The total number
    /// of attempts is `max_times + 1`.
    pub max_times: usize,
}

impl Default for RetryPolicy {
    /// - Min delay: 500ms
    /// - Max delay: 8s
    /// - Max retries: 4, so at most 5 attempts
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_times: 4,
        }
    }
}

impl RetryPolicy {
    /// A policy with no delay, for tests that exercise retry counts.
    #[must_use]
    pub fn immediate(max_times: usize) -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_times,
        }
    }

    /// Builds the `backon` backoff for this policy.
    #[must_use]
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_times)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use backon::Retryable;

    use super::*;

    #[tokio::test]
    async fn test_backoff_attempts_once_plus_max_times() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<(), &str> = (|| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("still failing")
            }
        })
        .retry(RetryPolicy::immediate(4).backoff())
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_default_policy_starts_at_half_a_second() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.min_delay, Duration::from_millis(500));
        assert_eq!(policy.max_times, 4);
    }

    #[tokio::test]
    async fn test_default_policy_makes_five_attempts() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let policy = RetryPolicy {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..RetryPolicy::default()
        };

        let result: Result<(), &str> = (|| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("still failing")
            }
        })
        .retry(policy.backoff())
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }
}

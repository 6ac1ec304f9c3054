//! Concrete retry policies.

use std::time::Duration;

use tokio::time::Instant;

use super::{ErrorClassification, RetryPolicy};
use crate::config::RetrySettings;

/// Exponential backoff for generic network calls.
///
/// Retries transport failures and server errors up to `number_of_retries`
/// times, waiting `delay_millis * delay_factor^attempt` between attempts.
#[derive(Debug, Clone)]
pub struct ExponentialBackoffPolicy {
    pub number_of_retries: u32,
    pub delay_millis: u64,
    pub delay_factor: u32,
}

impl ExponentialBackoffPolicy {
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            number_of_retries: settings.number_of_retries,
            delay_millis: settings.delay_millis,
            delay_factor: settings.delay_factor,
        }
    }

    pub fn delay_millis_for(&self, attempt: u32) -> u64 {
        (self.delay_factor as u64)
            .checked_pow(attempt)
            .and_then(|factor| factor.checked_mul(self.delay_millis))
            .unwrap_or(u64::MAX)
    }
}

impl Default for ExponentialBackoffPolicy {
    fn default() -> Self {
        Self {
            number_of_retries: 3,
            delay_millis: 500,
            delay_factor: 2,
        }
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn should_retry(&self, classification: ErrorClassification, attempt: u32) -> bool {
        classification.is_transient() && attempt < self.number_of_retries
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_millis_for(attempt))
    }
}

/// Bounded-duration polling, used while waiting for a device authorization.
///
/// Only `AuthorizationPending` is retried, at a fixed interval, for as long
/// as the expiration has not passed.
#[derive(Debug, Clone)]
pub struct PollingPolicy {
    expires_at: Instant,
    interval: Duration,
}

impl PollingPolicy {
    pub fn new(expires_in: Duration, interval: Duration) -> Self {
        Self {
            expires_at: Instant::now() + expires_in,
            interval,
        }
    }

    /// Retries left before the expiration, from the current time.
    pub fn remaining_retries(&self) -> u32 {
        if self.interval.is_zero() {
            return 0;
        }
        let remaining = self.expires_at.saturating_duration_since(Instant::now());
        (remaining.as_millis() / self.interval.as_millis().max(1)) as u32
    }
}

impl RetryPolicy for PollingPolicy {
    fn should_retry(&self, classification: ErrorClassification, _attempt: u32) -> bool {
        classification == ErrorClassification::AuthorizationPending
            && self.remaining_retries() > 0
    }

    fn delay_for(&self, _attempt: u32) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_from_settings() {
        let settings = RetrySettings {
            number_of_retries: 7,
            delay_millis: 250,
            delay_factor: 3,
        };
        let policy = ExponentialBackoffPolicy::new(&settings);

        assert_eq!(policy.number_of_retries, 7);
        assert_eq!(policy.delay_millis, 250);
        assert_eq!(policy.delay_factor, 3);
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = ExponentialBackoffPolicy {
            number_of_retries: 5,
            delay_millis: 100,
            delay_factor: 2,
        };

        assert_eq!(policy.delay_millis_for(0), 100);
        assert_eq!(policy.delay_millis_for(1), 200);
        assert_eq!(policy.delay_millis_for(2), 400);
        assert_eq!(policy.delay_millis_for(3), 800);
        assert_eq!(policy.delay_for(4), Duration::from_millis(1600));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = ExponentialBackoffPolicy {
            number_of_retries: 100,
            delay_millis: 1000,
            delay_factor: 10,
        };

        assert_eq!(policy.delay_millis_for(40), u64::MAX);
    }

    #[test]
    fn test_should_retry_transient_only() {
        let policy = ExponentialBackoffPolicy::default();

        assert!(policy.should_retry(ErrorClassification::Transport, 0));
        assert!(policy.should_retry(ErrorClassification::ServerError(502), 2));
        assert!(!policy.should_retry(ErrorClassification::ClientError(400), 0));
        assert!(!policy.should_retry(ErrorClassification::AuthorizationPending, 0));
        assert!(!policy.should_retry(ErrorClassification::Fatal, 0));
    }

    #[test]
    fn test_should_retry_max_retries_exceeded() {
        let policy = ExponentialBackoffPolicy {
            number_of_retries: 3,
            ..Default::default()
        };

        assert!(policy.should_retry(ErrorClassification::Transport, 2));
        assert!(!policy.should_retry(ErrorClassification::Transport, 3));
        assert!(!policy.should_retry(ErrorClassification::Transport, 10));
    }

    #[test]
    fn test_polling_remaining_retries() {
        let policy = PollingPolicy::new(Duration::from_secs(10), Duration::from_secs(2));
        let remaining = policy.remaining_retries();
        // A few microseconds elapse between construction and the check.
        assert!(remaining == 4 || remaining == 5);
    }

    #[test]
    fn test_polling_retries_only_pending() {
        let policy = PollingPolicy::new(Duration::from_secs(60), Duration::from_secs(1));

        assert!(policy.should_retry(ErrorClassification::AuthorizationPending, 0));
        assert!(!policy.should_retry(ErrorClassification::TokenExpired, 0));
        assert!(!policy.should_retry(ErrorClassification::Transport, 0));
        assert_eq!(policy.delay_for(9), Duration::from_secs(1));
    }

    #[test]
    fn test_polling_expired() {
        let policy = PollingPolicy::new(Duration::ZERO, Duration::from_secs(1));

        assert_eq!(policy.remaining_retries(), 0);
        assert!(!policy.should_retry(ErrorClassification::AuthorizationPending, 0));
    }
}

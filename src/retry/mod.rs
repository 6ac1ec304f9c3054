//! Retry policies for network operations.
//!
//! A policy decides, from the classification of a failure and the number of
//! attempts made so far, whether an operation is tried again and how long to
//! wait before doing so. [`execute`] drives an async operation through a
//! policy. Policies compose by nesting: an inner `execute` retries the raw
//! request, an outer one retries the whole flow on higher level failures.

mod policies;

pub use policies::{ExponentialBackoffPolicy, PollingPolicy};

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Coarse classification of a failure, as seen by retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Connection refused, reset, timed out.
    Transport,
    /// HTTP 5xx.
    ServerError(u16),
    /// HTTP 4xx without a retryable sub-status.
    ClientError(u16),
    /// Device authorization still waiting for the user.
    AuthorizationPending,
    /// Credentials must be refreshed before trying again.
    TokenExpired,
    /// Anything that will not get better by trying again.
    Fatal,
}

impl ErrorClassification {
    /// Network and server side failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorClassification::Transport | ErrorClassification::ServerError(_)
        )
    }
}

/// Errors that can be classified for retrying.
pub trait Classify {
    fn classification(&self) -> ErrorClassification;
}

/// Contract shared by all retry policies.
pub trait RetryPolicy: Send + Sync {
    /// Whether a failure classified as `classification` should be retried
    /// after `attempt` retries have already been made (0 on first failure).
    fn should_retry(&self, classification: ErrorClassification, attempt: u32) -> bool;

    /// How long to wait before retry number `attempt` (0-based).
    fn delay_for(&self, attempt: u32) -> Duration;
}

/// Run `operation` until it succeeds or `policy` gives up.
///
/// Returns the last failure when the policy refuses to retry. The operation
/// is re-invoked from scratch on every attempt, so it must be idempotent.
pub async fn execute<P, T, E, F, Fut>(policy: &P, mut operation: F) -> Result<T, E>
where
    P: RetryPolicy + ?Sized,
    E: Classify + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let classification = err.classification();
                if !policy.should_retry(classification, attempt) {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                debug!(
                    "Retrying after {:?} (attempt {}, {:?}): {}",
                    delay,
                    attempt + 1,
                    classification,
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

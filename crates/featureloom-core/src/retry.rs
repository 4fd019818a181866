//! Retry logic with exponential backoff
//!
//! Used when schema migration races an online backend that is still settling
//! (a table being dropped while it is re-created, a cluster that is briefly
//! unreachable). Only errors whose [`TransientKind`] is listed in the policy
//! are retried; everything else surfaces immediately.
//!
//! # Example
//!
//! ```rust,ignore
//! use featureloom_core::retry::{RetryPolicy, retry_async};
//!
//! let policy = RetryPolicy::default();
//! retry_async(&policy, "online_update", || async {
//!     online.update(project, &keep, &delete).await
//! }).await?;
//! ```

use crate::{Error, Result, TransientKind};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Initial backoff delay
    pub initial_delay: Duration,

    /// Maximum backoff delay (caps exponential growth)
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (typically 2.0)
    pub backoff_multiplier: f64,

    /// Random jitter applied to each delay (0.0-1.0)
    pub jitter_factor: f64,

    /// Total time budget, attempts included; the last error is returned
    /// once it is spent, or `Error::Timeout` if an attempt outlives it
    pub timeout: Duration,

    /// Transient failure kinds that trigger another attempt
    pub retry_on: Vec<TransientKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            timeout: Duration::from_secs(60),
            retry_on: vec![TransientKind::Conflict, TransientKind::Unavailable],
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries; the single attempt keeps the default budget
    pub fn none() -> Self {
        Self {
            retry_on: Vec::new(),
            ..Self::default()
        }
    }

    /// Calculate backoff delay for a given attempt
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let jitter = 1.0 + (rand::random::<f64>() * 2.0 - 1.0) * self.jitter_factor;
        let final_delay = (capped_delay * jitter).max(0.0) as u64;

        Duration::from_millis(final_delay)
    }

    /// Whether this policy retries the given error
    pub fn is_retryable(&self, error: &Error) -> bool {
        error
            .transient_kind()
            .map(|kind| self.retry_on.contains(&kind))
            .unwrap_or(false)
    }
}

/// Retry an async operation until it succeeds, fails permanently or the
/// policy's deadline passes
///
/// The operation always runs at least once. Neither an attempt nor a sleep
/// extends past the deadline: an attempt still pending at the deadline is
/// dropped and `Error::Timeout` returned, otherwise the most recent error is
/// returned once the budget is spent.
pub async fn retry_async<F, Fut, T>(policy: &RetryPolicy, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut attempts = 0;

    loop {
        attempts += 1;

        let remaining = deadline.saturating_duration_since(Instant::now());
        let error = match tokio::time::timeout(remaining, operation()).await {
            Ok(Ok(result)) => {
                if attempts > 1 {
                    debug!(operation = what, attempts, "Operation succeeded after retries");
                }
                return Ok(result);
            }
            Ok(Err(error)) => error,
            Err(_) => {
                warn!(
                    operation = what,
                    attempts,
                    timeout_ms = policy.timeout.as_millis() as u64,
                    "Attempt did not finish before the retry deadline"
                );
                return Err(Error::Timeout(policy.timeout));
            }
        };

        if !policy.is_retryable(&error) {
            return Err(error);
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(operation = what, attempts, error = %error, "Retry budget exhausted");
            return Err(error);
        }

        let delay = policy.backoff_delay(attempts - 1).min(deadline - now);
        debug!(
            operation = what,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

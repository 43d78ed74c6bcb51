//! Consumer retry logic with exponential backoff
//!
//! Inbound handlers get a bounded number of attempts before the event is
//! dead-lettered (domain class) or dropped (analytics class). Backoff sleeps
//! are interruptible by a cancellation token so shutdown is not delayed.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial backoff duration (doubles on each retry)
    pub initial_backoff: Duration,
    /// Maximum backoff duration to cap exponential growth
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff to wait after `attempt` failed (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << shift;
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

/// Outcome of a retried operation that ultimately failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    pub error: E,
    pub attempts: u32,
    /// True when cancellation cut the retry loop short
    pub cancelled: bool,
}

/// Retry a fallible async operation with exponential backoff
///
/// # Arguments
/// * `operation` - The async operation to retry
/// * `config` - Retry configuration
/// * `context` - Context string for logging (e.g., "payout_eligible_handler")
/// * `cancel` - Stops further attempts when triggered
///
/// # Returns
/// * `Ok(T)` if the operation succeeds within `max_attempts`
/// * `Err(RetryExhausted)` with the last error and attempt count otherwise
///
/// # Example
/// ```rust
/// use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() {
/// let cancel = CancellationToken::new();
/// let result = retry_with_backoff(
///     || async { Ok::<_, String>(42) },
///     &RetryConfig::default(),
///     "example_operation",
///     &cancel,
/// )
/// .await;
/// assert_eq!(result.ok(), Some(42));
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    config: &RetryConfig,
    context: &str,
    cancel: &CancellationToken,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(context = %context, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => e,
        };

        if attempt >= max_attempts {
            warn!(
                context = %context,
                attempts = attempt,
                error = %error,
                "Operation failed after max retries"
            );
            return Err(RetryExhausted {
                error,
                attempts: attempt,
                cancelled: false,
            });
        }

        let backoff = config.backoff_after(attempt);
        warn!(
            context = %context,
            attempt,
            max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "Operation failed, retrying with backoff"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                warn!(context = %context, attempts = attempt, "Retry loop cancelled");
                return Err(RetryExhausted {
                    error,
                    attempts: attempt,
                    cancelled: true,
                });
            }
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

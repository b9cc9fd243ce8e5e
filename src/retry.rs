//! Retry logic with exponential backoff
//!
//! This module provides configurable retry logic for transient export failures.
//! It implements exponential backoff with optional jitter to prevent thundering herd.
//!
//! # Example
//!
//! ```no_run
//! use zip_export::retry::{IsRetryable, retry_with_backoff};
//! use zip_export::config::RetryConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! let result = retry_with_backoff(&config, &cancel, |_attempt| async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }, |_, _, _| {}).await.result?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::ExportError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, 5xx, connection resets) should return `true`.
/// Permanent failures (rejected credential, rejected payload) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ExportError {
    fn is_retryable(&self) -> bool {
        match self {
            ExportError::Transient { .. } | ExportError::Network(_) | ExportError::Timeout(_) => {
                true
            }
            // Needs a new credential, retrying the same call cannot help
            ExportError::Auth { .. } => false,
            // The payload itself was refused
            ExportError::ServerRejected { .. } | ExportError::InvalidRequest(_) => false,
        }
    }
}

/// Outcome of [`retry_with_backoff`]: the final result plus the number of calls made
#[derive(Debug)]
pub struct Attempted<T, E> {
    /// Result of the last call
    pub result: Result<T, E>,
    /// Calls made, first call included
    pub attempts: u32,
}

/// Execute an async operation with exponential backoff retry logic
///
/// `operation` receives the 1-based attempt number and is called at most
/// `config.max_attempts` times. Non-retryable errors end the loop
/// immediately. When `cancel` fires during a backoff wait, the last error is
/// returned without further calls. `on_retry` is invoked with the failed
/// attempt number, its error and the upcoming delay before each retry.
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
    mut on_retry: R,
) -> Attempted<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
    R: FnMut(u32, &E, Duration),
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    let mut delay = config.initial_delay;

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Attempted {
                    result: Ok(result),
                    attempts: attempt,
                };
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                // Calculate jittered delay
                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = jittered_delay.as_millis(),
                    "Operation failed, retrying"
                );
                on_retry(attempt, &e, jittered_delay);

                // Wait before retrying, unless the run is being cancelled
                tokio::select! {
                    _ = tokio::time::sleep(jittered_delay) => {}
                    _ = cancel.cancelled() => {
                        tracing::info!(attempt = attempt, "Cancelled during retry backoff");
                        return Attempted {
                            result: Err(e),
                            attempts: attempt,
                        };
                    }
                }

                attempt += 1;

                // Calculate next delay with exponential backoff, saturating at max_delay
                let next_delay =
                    Duration::try_from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
                        .unwrap_or(config.max_delay);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                }
                return Attempted {
                    result: Err(e),
                    attempts: attempt,
                };
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`,
/// saturating at [`Duration::MAX`].
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jitter = Duration::try_from_secs_f64(delay.as_secs_f64() * jitter_factor).unwrap_or(delay);
    delay.saturating_add(jitter)
}

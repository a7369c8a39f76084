use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Fixed-Interval Retry Strategy
// ============================================================================
//
// Bounded retries for transient failures (connection drops, timeouts).
// Errors that are not transient end the loop on the attempt that produced
// them. The wait between attempts races against the owner's shutdown token,
// so a pending backoff never delays process exit.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay between two attempts
    pub interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_secs(5),
        }
    }
}

/// Result of a retry operation
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded
    Success(T),
    /// Operation failed on every attempt; carries the last error
    Failed { attempts: u32, error: E },
    /// Operation failed with an error that must not be retried
    PermanentFailure(E),
    /// Shutdown was signalled while waiting for the next attempt
    Cancelled,
}

/// Check if an error is transient (should retry) or permanent (should not retry)
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

/// Retry with transient error checking
pub async fn retry_on_transient<F, Fut, T, E>(
    operation_name: &'static str,
    config: &RetryConfig,
    shutdown: &CancellationToken,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        tracing::debug!(
            operation = operation_name,
            attempt = attempt,
            max_attempts = config.max_attempts,
            "Attempting operation"
        );

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return RetryResult::Success(result);
            }
            Err(error) => {
                if !error.is_transient() {
                    return RetryResult::PermanentFailure(error);
                }

                if attempt >= config.max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt = attempt,
                        error = %error,
                        "Operation failed after all retries"
                    );
                    return RetryResult::Failed { attempts: attempt, error };
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt,
                    error = %error,
                    delay_ms = config.interval.as_millis() as u64,
                    "Transient failure, retrying after delay"
                );

                tokio::select! {
                    _ = shutdown.cancelled() => return RetryResult::Cancelled,
                    _ = tokio::time::sleep(config.interval) => {}
                }
            }
        }
    }
}

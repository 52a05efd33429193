//! Bounded exponential backoff for remote calls.
//!
//! Every remote call made by a session (schema resolution, head queries, range
//! fetches, snapshot requests, live resubscription) goes through
//! [`RetryPolicy::run`], which applies a per-attempt timeout and gives up after
//! the configured number of attempts.

use crate::config::RetryConfig;
use backoff::ExponentialBackoff;
use backoff::future::retry;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// A remote operation that kept failing until its attempt ceiling
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed after {attempts} attempt(s): {message}")]
pub struct FetchError {
    pub operation: String,
    pub attempts: u32,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.config.initial_interval(),
            initial_interval: self.config.initial_interval(),
            max_interval: self.config.max_interval(),
            multiplier: self.config.multiplier,
            // the attempt ceiling bounds the loop instead
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    /// Run `operation` until it succeeds or the attempt ceiling is reached.
    ///
    /// Each attempt is bounded by the request timeout; a timed-out attempt
    /// counts like any other failure.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = AtomicU32::new(0);
        let max_attempts = self.config.max_attempts.max(1);
        let timeout = self.config.request_timeout();
        let attempts_ref = &attempts;

        let result = retry(self.backoff(), || {
            let attempt = f();
            async move {
                let n = attempts_ref.fetch_add(1, Ordering::SeqCst) + 1;
                let message = match tokio::time::timeout(timeout, attempt).await {
                    Ok(Ok(value)) => return Ok(value),
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => format!("timed out after {:?}", timeout),
                };

                if n >= max_attempts {
                    Err(backoff::Error::permanent(message))
                } else {
                    warn!(
                        "{} attempt {}/{} failed: {}",
                        operation, n, max_attempts, message
                    );
                    Err(backoff::Error::transient(message))
                }
            }
        })
        .await;

        result.map_err(|message| {
            let attempts = attempts.load(Ordering::SeqCst);
            debug!("{} giving up after {} attempt(s)", operation, attempts);
            FetchError {
                operation: operation.to_string(),
                attempts,
                message,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            initial_interval_ms: 1,
            max_interval_ms: 2,
            multiplier: 1.5,
            request_timeout_ms: 50,
        })
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = fast_policy(5)
            .run("flaky", move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 { Err("not yet") } else { Ok(n) }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_at_the_attempt_ceiling() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let err = fast_policy(3)
            .run("always failing", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("boom") }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.attempts, 3);
        assert_eq!(err.operation, "always failing");
        assert_eq!(err.message, "boom");
    }

    #[tokio::test]
    async fn timeouts_count_as_failed_attempts() {
        let err = fast_policy(2)
            .run("slow", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), String>(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 2);
        assert!(err.message.contains("timed out"));
    }
}

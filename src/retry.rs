//! Bounded exponential backoff for transient collaborator failures.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }
}

/// Run `operation` until it succeeds or the attempt budget is spent.
/// The last error is returned unchanged.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: RetryPolicy,
    mut operation: F,
    operation_name: &str,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = policy.initial_delay;

    for attempt in 1..=policy.max_attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if attempt == policy.max_attempts {
                    warn!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "retry budget exhausted"
                    );
                    return Err(err);
                }
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * policy.backoff_multiplier)
                        .min(policy.max_delay.as_secs_f64()),
                );
            }
        }
    }

    unreachable!("loop exits via return")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            ..RetryPolicy::with_attempts(3)
        };
        let result: Result<u32, String> = retry_with_backoff(
            policy,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 { Err("not yet".to_string()) } else { Ok(n) }
                }
            },
            "test_op",
        )
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            ..RetryPolicy::with_attempts(2)
        };
        let result: Result<(), String> =
            retry_with_backoff(policy, || async { Err("down".to_string()) }, "test_op").await;
        assert_eq!(result.unwrap_err(), "down");
    }
}

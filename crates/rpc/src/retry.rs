use std::future::Future;
use std::time::Duration;

use chainidx_common::error::IndexerError;
use rand::Rng;

/// Retry/backoff/timeout configuration shared by every `ChainRpc` operation.
///
/// Total operation time is bounded by `per_call_timeout * max_retries`.
/// Backoff is exponential with full jitter, based on `base_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub per_call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(200),
            per_call_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1 << attempt.min(10));
        let jitter_ms = rand::thread_rng().gen_range(0..=exp.as_millis().max(1) as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Runs `op` under this policy: each attempt is bounded by `per_call_timeout`,
/// transient failures (per `IndexerError::is_transient`) are retried with
/// jittered backoff up to `max_retries` attempts, and permanent failures
/// return immediately.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    op_name: &str,
    mut op: F,
) -> Result<T, IndexerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, IndexerError>>,
{
    let mut attempt = 0;
    loop {
        let call = tokio::time::timeout(policy.per_call_timeout, op());
        let result = match call.await {
            Ok(inner) => inner,
            Err(_) => Err(IndexerError::RpcTimeout(attempt + 1)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_retries => {
                let delay = policy.backoff_for(attempt);
                tracing::debug!(op = op_name, attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying rpc call");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if attempt + 1 >= policy.max_retries {
                    tracing::warn!(op = op_name, attempts = attempt + 1, error = %err, "rpc call exhausted retries");
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(1),
            per_call_timeout: Duration::from_secs(1),
        };

        let result = with_retry(&policy, "test_op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(IndexerError::Rpc("connection reset".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_does_not_retry() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result: Result<(), IndexerError> = with_retry(&policy, "test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(IndexerError::Rpc("-32601 method not found".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_error_exhausts_retries() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            per_call_timeout: Duration::from_secs(1),
        };

        let result: Result<(), IndexerError> = with_retry(&policy, "test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(IndexerError::Rpc("timeout".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}

//! Bounded retry with exponential back-off for transient provider errors.

use std::future::Future;

use provisioning::{ProviderResult, RetryPolicy, RetrySettings};

/// Invokes `call` until it succeeds, fails with a non-retryable error, or
/// `settings.max_attempts` attempts have been made.
///
/// A provider-supplied `retry_after` takes precedence over the computed
/// back-off. Only call this for idempotent provider operations.
pub async fn with_backoff<T, F, Fut>(
    settings: &RetrySettings,
    operation: &str,
    mut call: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let mut attempt: u32 = 1;
    loop {
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let after = match err.retry_policy() {
            RetryPolicy::Retryable { after } if attempt < settings.max_attempts => after,
            _ => return Err(err),
        };

        let delay = after.unwrap_or_else(|| settings.backoff(attempt));
        tracing::warn!(
            operation,
            attempt,
            max_attempts = settings.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient provider error; retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

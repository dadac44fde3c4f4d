use std::time::Duration;

use batch_pipeline_core::retry::BackoffPolicy;
use tracing::warn;

use crate::adapters::batch_jobs::ClientError;

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the policy runs out of attempts. `sleep` is injected so tests do not wait.
pub fn retry_with_backoff<T>(
    policy: &BackoffPolicy,
    sleep: &mut dyn FnMut(Duration),
    mut operation: impl FnMut() -> Result<T, ClientError>,
) -> Result<T, ClientError> {
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && policy.should_retry(attempt) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    component = "retry",
                    event = "retrying_after_throttle",
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying throttled call"
                );
                sleep(delay);
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Production sleep: parks the worker thread without stalling the runtime.
pub fn blocking_sleep(delay: Duration) {
    tokio::task::block_in_place(|| std::thread::sleep(delay));
}

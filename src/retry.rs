//! Bounded connect retries with a linearly growing delay.

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Runs `attempt` until it succeeds or the policy is exhausted.
///
/// Exhaustion is reported as [`Error::Connection`] carrying the last failure.
pub async fn retry_connect<T, F, Fut>(
    policy: &RetryPolicy,
    backend: &'static str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut current = 1;

    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if current >= max_attempts => {
                error!(backend, attempts = current, error = %e, "Connection attempts exhausted");
                return Err(Error::connection(
                    backend,
                    format!("giving up after {} attempts", current),
                    Some(Box::new(e)),
                ));
            }
            Err(e) => {
                let delay = policy.delay_after(current);
                warn!(
                    backend,
                    attempt = current,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Connection attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                current += 1;
            }
        }
    }
}

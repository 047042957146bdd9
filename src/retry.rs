//! Retry with exponential backoff and jitter
//!
//! Used for calls that fail transiently, status patches against the
//! Kubernetes API mostly. Fatal errors short-circuit: a corrupt spec
//! snapshot does not get better by asking again.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::Error;

/// Backoff schedule for a retried operation
#[derive(Clone, Debug)]
pub struct Backoff {
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap on the delay between attempts
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// Delay before the given retry, doubled per attempt with 0.5x-1.5x
    /// jitter and capped at `max_delay`
    fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(exp.as_secs_f64() * jitter)
    }
}

/// Run `operation` until it succeeds, its error is fatal, or the schedule
/// is exhausted.
pub async fn retry<F, Fut, T>(backoff: &Backoff, what: &str, mut operation: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                attempt += 1;
                if attempt >= backoff.max_attempts {
                    return Err(err);
                }
                let delay = backoff.delay(attempt - 1);
                warn!(
                    operation = %what,
                    attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

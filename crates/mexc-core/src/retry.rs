//! Retry with exponential backoff for transient venue failures.
//!
//! Only errors classified as recoverable (timeouts, 5xx, venue-side 429)
//! are retried; validation and terminal errors surface immediately. When
//! the attempt budget runs out the last transient error is wrapped in
//! `RetriesExhausted`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{MexcError, MexcResult};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (does not include the initial attempt).
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
    /// Cap on a single backoff delay.
    pub max_delay: Duration,
    /// Randomize each delay by +/-50% to avoid synchronized retries.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// Read overrides from `RETRY_MAX_ATTEMPTS` / `RETRY_BASE_DELAY_MS`,
    /// falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_retries = std::env::var("RETRY_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_retries);
        let base_delay = std::env::var("RETRY_BASE_DELAY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.base_delay);
        Self {
            max_retries,
            base_delay,
            ..defaults
        }
    }

    /// Backoff before retry number `retry` (zero-based): `base * 2^retry`,
    /// capped, with optional jitter.
    fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.min(16);
        let raw = self
            .base_delay
            .saturating_mul(factor as u32)
            .min(self.max_delay);
        if self.jitter {
            raw.mul_f64(rand::thread_rng().gen_range(0.5..1.5))
        } else {
            raw
        }
    }
}

/// Run `request_fn` until it succeeds, fails permanently, or the retry
/// budget is exhausted.
pub async fn execute_with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation: &'static str,
    mut request_fn: F,
) -> MexcResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MexcResult<T>>,
{
    let mut failures: u32 = 0;
    loop {
        match request_fn().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_recoverable() => {
                failures += 1;
                if failures > config.max_retries {
                    return Err(MexcError::RetriesExhausted {
                        operation,
                        attempts: failures,
                        last_error: err.to_string(),
                    });
                }
                let delay = config.backoff_delay(failures - 1);
                tracing::warn!(
                    "{}: attempt {}/{} failed ({}), retrying in {}ms",
                    operation,
                    failures,
                    config.max_retries + 1,
                    err,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

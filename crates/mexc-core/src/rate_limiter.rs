//! Weighted sliding-window rate limiter shared by all outbound requests.
//!
//! The limiter tracks the weight of recent requests inside one or more
//! rolling windows. Requests are never dropped: `acquire` either records the
//! weight immediately, sleeps until the budget frees up, or fails when the
//! required wait would exceed the configured ceiling.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::{MexcError, MexcResult};

/// A single rate limit constraint, e.g. "500 weight per 10 seconds".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum total request weight inside the window.
    pub max_weight: u32,
    /// Rolling window duration.
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max_weight: u32, window: Duration) -> Self {
        Self { max_weight, window }
    }

    pub fn per_second(max_weight: u32) -> Self {
        Self::new(max_weight, Duration::from_secs(1))
    }

    pub fn per_minute(max_weight: u32) -> Self {
        Self::new(max_weight, Duration::from_secs(60))
    }
}

/// Sliding-window limiter, safe for concurrent callers.
///
/// One instance is shared per credential set; all REST calls funnel through
/// the same budget regardless of which task issues them.
#[derive(Clone)]
pub struct RateLimiter {
    limits: Vec<RateLimit>,
    /// Recent `(instant, weight)` entries, one queue per limit.
    history: Arc<Mutex<Vec<VecDeque<(Instant, u32)>>>>,
    /// Ceiling on a single computed wait; beyond it `acquire` fails instead
    /// of blocking.
    max_wait: Duration,
}

impl RateLimiter {
    pub fn new(limits: Vec<RateLimit>) -> Self {
        let history = vec![VecDeque::new(); limits.len()];
        Self {
            limits,
            history: Arc::new(Mutex::new(history)),
            max_wait: Duration::from_secs(30),
        }
    }

    /// Preset for the MEXC spot API: 500 weight per 10 seconds per endpoint
    /// group, kept conservative.
    pub fn mexc() -> Self {
        Self::new(vec![RateLimit::new(500, Duration::from_secs(10))])
    }

    /// No limits; useful in tests.
    pub fn disabled() -> Self {
        Self::new(vec![])
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn limits(&self) -> &[RateLimit] {
        &self.limits
    }

    /// Record `weight` against every window, sleeping first if the budget is
    /// currently exhausted.
    ///
    /// Fails with `RateLimitExceeded` when the computed delay exceeds the
    /// ceiling, and with `Validation` when the weight can never fit.
    pub async fn acquire(&self, weight: u32) -> MexcResult<()> {
        if self.limits.is_empty() {
            return Ok(());
        }
        if let Some(limit) = self.limits.iter().find(|l| weight > l.max_weight) {
            return Err(MexcError::validation(
                "rate_limiter.acquire",
                format!(
                    "weight {} exceeds window capacity {}",
                    weight, limit.max_weight
                ),
            ));
        }

        loop {
            let wait = {
                let mut history = self.history.lock().await;
                let now = Instant::now();
                let mut max_wait = Duration::ZERO;

                for (i, limit) in self.limits.iter().enumerate() {
                    Self::expire_old(&mut history[i], limit.window, now);
                    let used: u32 = history[i].iter().map(|(_, w)| *w).sum();
                    if used + weight > limit.max_weight {
                        let wait = Self::wait_until_fits(&history[i], limit, used, weight, now);
                        max_wait = max_wait.max(wait);
                    }
                }

                if max_wait.is_zero() {
                    for queue in history.iter_mut() {
                        queue.push_back((now, weight));
                    }
                    return Ok(());
                }
                max_wait
            };

            if wait > self.max_wait {
                return Err(MexcError::RateLimitExceeded {
                    would_wait: wait,
                    ceiling: self.max_wait,
                });
            }

            tracing::debug!(
                "rate limiter: waiting {}ms before dispatching weight {}",
                wait.as_millis(),
                weight
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Total weight currently recorded in the first window. Test hook.
    pub async fn current_weight(&self) -> u32 {
        let mut history = self.history.lock().await;
        let now = Instant::now();
        match self.limits.first() {
            Some(limit) => {
                Self::expire_old(&mut history[0], limit.window, now);
                history[0].iter().map(|(_, w)| *w).sum()
            }
            None => 0,
        }
    }

    fn expire_old(queue: &mut VecDeque<(Instant, u32)>, window: Duration, now: Instant) {
        while let Some((ts, _)) = queue.front() {
            if now.duration_since(*ts) >= window {
                queue.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long until enough of the oldest entries expire for `weight` to fit.
    fn wait_until_fits(
        queue: &VecDeque<(Instant, u32)>,
        limit: &RateLimit,
        used: u32,
        weight: u32,
        now: Instant,
    ) -> Duration {
        let mut freed = 0u32;
        for (ts, w) in queue.iter() {
            freed += w;
            if used - freed + weight <= limit.max_weight {
                let elapsed = now.duration_since(*ts);
                return limit.window.saturating_sub(elapsed);
            }
        }
        limit.window
    }
}

//! Exponential backoff for upstream calls.
//!
//! An attempt reports its own outcome as an `Attempt` value; the driver
//! retries `Retryable` outcomes until the budget runs out and stops at the
//! first `Success` or `Terminal` one.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    Success(T),
    Retryable(E),
    Terminal(E),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based), capped and jittered.
    ///
    /// Jitter adds up to 20% on top of the capped delay, and the result never
    /// exceeds `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let base = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let cap = self.max_delay.as_secs_f64();
        let capped = base.min(cap);
        let jitter = capped * rand::random::<f64>() * 0.2;
        Duration::from_secs_f64((capped + jitter).min(cap).max(0.0))
    }

    /// Drive `attempt` until it succeeds, fails terminally, or the retry
    /// budget is spent. The last error is returned on failure.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut attempt: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Attempt<T, E>>,
    {
        let mut retry = 0;
        loop {
            match attempt().await {
                Attempt::Success(value) => return Ok(value),
                Attempt::Terminal(err) => return Err(err),
                Attempt::Retryable(err) if retry >= self.max_retries => return Err(err),
                Attempt::Retryable(err) => {
                    let delay = self.delay_for(retry);
                    retry += 1;
                    warn!(
                        call = label,
                        error = %err,
                        retry,
                        max_retries = self.max_retries,
                        ?delay,
                        "upstream call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

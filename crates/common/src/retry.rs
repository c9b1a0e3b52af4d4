use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// Bounded retry schedule for calls to external collaborators.
///
/// Attempt `n` (1-based) that fails is followed by a sleep of
/// `initial_backoff_ms * multiplier^(n-1)`, capped at `max_backoff_ms`.
/// No sleep follows the last attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Hard limit on a single attempt.
    pub per_attempt_timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            per_attempt_timeout_ms: 20_000,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Reject schedules that could never make a useful attempt or whose
    /// backoff shrinks. `name` labels the policy in the error.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(format!("{name}: max_attempts must be at least 1")));
        }
        if self.per_attempt_timeout_ms == 0 {
            return Err(Error::Config(format!(
                "{name}: per_attempt_timeout_ms must be positive"
            )));
        }
        if !(self.multiplier >= 1.0 && self.multiplier.is_finite()) {
            return Err(Error::Config(format!(
                "{name}: multiplier must be at least 1, got {}",
                self.multiplier
            )));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(Error::Config(format!(
                "{name}: max_backoff_ms is below initial_backoff_ms"
            )));
        }
        Ok(())
    }

    pub fn per_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.per_attempt_timeout_ms)
    }

    /// Sleep before the attempt following failed attempt `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let ms = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exp);
        Duration::from_millis(ms.min(self.max_backoff_ms as f64) as u64)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Every attempt runs under the per-attempt timeout.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let timeout = self.per_attempt_timeout();
        let mut last_err = Error::Other(format!("{label}: no attempts made"));

        for attempt in 1..=attempts {
            let result = match tokio::time::timeout(timeout, op()).await {
                Ok(r) => r,
                Err(_) => Err(Error::Timeout(timeout)),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!(call = label, attempt, max_attempts = attempts, error = %e, "Attempt failed");
                    last_err = e;
                    if attempt < attempts {
                        tokio::time::sleep(self.backoff_after(attempt)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }
}

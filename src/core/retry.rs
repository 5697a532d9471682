//! Bounded retry with exponential backoff.
//!
//! Only errors that report themselves as retryable are attempted again;
//! permanent failures return on the first occurrence.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MediaError, MediaResult};

/// Backoff schedule applied to transient store and bus failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts in total, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait before the second attempt, in ms
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound on any single wait, in ms
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Growth factor applied to the wait after every failure
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    200
}
fn default_max_delay() -> u64 {
    5000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Policy that never waits, for tests and local tooling
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Wait that follows failed attempt `attempt` (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Whether another attempt is allowed after `attempt`
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-indexed attempt number. On exhaustion the last
    /// error is returned along with the number of attempts made.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, (MediaError, u32)>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = MediaResult<T>>,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && self.should_retry(attempt) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }
}

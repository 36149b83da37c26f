//! Retry Policy
//!
//! Exponential backoff for transient provider failures. Permanent
//! failures and exhausted budgets surface the terminal error unchanged.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::core::config::RetryConfig;
use crate::core::{PipelineError, PipelineResult};

// =============================================================================
// Retry Policy
// =============================================================================

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Randomize each delay by up to +50%
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            jitter: false,
        }
    }

    /// Deterministic backoff component for the given zero-based attempt:
    /// `base * 2^attempt`. Jitter is applied separately at sleep time so
    /// this stays pure and testable.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    fn sleep_duration(&self, attempt: u32) -> Duration {
        let base = self.delay_for(attempt);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(1.0..1.5);
            base.mul_f64(factor)
        } else {
            base
        }
    }

    /// Runs `f` until it succeeds, returns a non-transient error, or the
    /// attempt budget is exhausted. The last error is returned verbatim.
    pub async fn run<F, Fut, T>(&self, operation: &str, f: F) -> PipelineResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        let mut last_error: Option<PipelineError> = None;

        for attempt in 0..self.max_attempts {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_transient() || attempt + 1 == self.max_attempts {
                        return Err(e);
                    }

                    let delay = self.sleep_duration(attempt);
                    warn!(
                        "{} attempt {} failed, retrying in {}ms: {}",
                        operation,
                        attempt + 1,
                        delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            PipelineError::IndexingTransient(format!(
                "{} failed after {} attempts",
                operation, self.max_attempts
            ))
        }))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            jitter: config.jitter,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

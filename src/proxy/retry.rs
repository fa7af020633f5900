//! Bounded retry policy

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::error::PacError;

/// Maximum attempts plus a fixed backoff between failed attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

/// Result of running an operation under a [`RetryPolicy`]
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: std::result::Result<T, PacError>,
    /// Attempts actually made, including the successful one
    pub attempts: u32,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the budget runs out
    ///
    /// `op` receives the 1-based attempt number. The backoff is slept only between
    /// attempts, never after the last one.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, PacError>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match op(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(e) if attempt < self.max_attempts && e.is_retryable() => {
                    if !self.backoff.is_zero() {
                        sleep(self.backoff).await;
                    }
                }
                Err(e) => {
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt,
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

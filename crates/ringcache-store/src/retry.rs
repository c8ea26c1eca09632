//! Bounded retry with a fixed delay.

use std::fmt::Display;
use std::time::Duration;

use ringcache_types::RetryConfig;
use tracing::warn;

use crate::error::StoreError;

/// Errors that can say whether retrying might help.
pub trait Transient {
    /// Connectivity or timeout failure.
    fn is_transient(&self) -> bool;
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

/// Retries an operation on transient failures.
///
/// `attempts` counts every call including the first. Non-transient errors
/// return immediately. After the last attempt the last error is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Policy with `attempts` total calls (at least one) and a fixed delay.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Total attempts.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay between attempts.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        E: Transient + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self::new(config.attempts, Duration::from_millis(config.delay_ms))
    }
}

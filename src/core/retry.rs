use crate::providers::{ProviderError, ProviderResult};
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_ATTEMPTS: u32 = 2;
pub const DEFAULT_DELAY: Duration = Duration::from_millis(200);

/// Fixed-delay retry for calls that place orders. Fatal errors (rejected
/// credentials, missing configuration) are returned on first sight; any other
/// failure is retried until the budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, DEFAULT_DELAY)
    }
}

impl RetryPolicy {
    /// `attempts` below 1 is treated as a single attempt.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn run<T, F, Fut>(&self, mut operation: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut last_message = String::new();

        for attempt in 1..=self.attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_fatal() => {
                    tracing::error!("Fatal provider error, not retrying: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        "Provider call failed (attempt {}/{}): {}",
                        attempt,
                        self.attempts,
                        e
                    );
                    last_message = e.to_string();
                    if attempt < self.attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }

        Err(ProviderError::AttemptsExhausted {
            attempts: self.attempts,
            message: last_message,
        })
    }
}

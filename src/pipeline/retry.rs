use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::common::error::Result;
use crate::config::RetrySettings;

/// Capped retry with a fixed backoff schedule. Only errors the error type
/// classifies as retryable get another attempt; everything else surfaces on
/// the first failure.
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            settings
                .delays_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        )
    }

    /// Run `op` with up to `delays.len()` retries after the initial attempt.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0usize;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.delays.len() => {
                    let delay = self.delays[attempt];
                    attempt += 1;
                    warn!(
                        operation = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

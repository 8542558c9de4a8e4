use crate::clock::Clock;
use crate::error::RecorderError;
use log::warn;
use std::future::Future;
use std::time::Duration;

/// Bounded retry for setup-time calls against the snapshot source. Waits go through
/// the recorder's clock, and only errors reporting themselves as retryable are
/// attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub async fn run<T, F, Fut>(
        &self,
        clock: &dyn Clock,
        context: &str,
        mut operation: F,
    ) -> Result<T, RecorderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RecorderError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.attempts || !err.is_retryable() => return Err(err),
                Err(err) => {
                    warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {}s.",
                        attempt,
                        self.attempts,
                        context,
                        err,
                        self.delay.as_secs()
                    );
                    clock.sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

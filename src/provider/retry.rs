use crate::config::RetryConfig;
use crate::error::ProviderError;
use crate::provider::{FetchedMetrics, MetricsProvider};
use async_trait::async_trait;
use std::time::Duration;

/// Bounded exponential backoff for transient provider failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, given `attempt` (1-based) just failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Wraps any provider with per-video retries. Non-retryable kinds fail fast.
pub struct RetryingProvider<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: MetricsProvider> RetryingProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<P: MetricsProvider> MetricsProvider for RetryingProvider<P> {
    async fn fetch_metrics(&self, video_id: &str) -> Result<FetchedMetrics, ProviderError> {
        let mut attempt = 1;
        loop {
            match self.inner.fetch_metrics(video_id).await {
                Ok(fetched) => return Ok(fetched),
                Err(err) if err.kind.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_after(attempt);
                    tracing::debug!(
                        video_id,
                        attempt,
                        kind = ?err.kind,
                        delay_ms = delay.as_millis() as u64,
                        "retrying metrics fetch"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

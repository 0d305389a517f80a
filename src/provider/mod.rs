pub mod apify;
pub mod retry;

use crate::error::ProviderError;
use crate::model::EngagementMetrics;
use async_trait::async_trait;

pub use apify::ApifyProvider;
pub use retry::{RetryPolicy, RetryingProvider};

/// Validated metrics returned by a provider for one video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMetrics {
    pub metrics: EngagementMetrics,
    pub creator: Option<String>,
}

/// External source of current engagement metrics.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn fetch_metrics(&self, video_id: &str) -> Result<FetchedMetrics, ProviderError>;

    fn name(&self) -> &str;
}

/// Social platform a video URL belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    TikTok,
    Instagram,
}

impl Platform {
    pub fn detect(url: &str) -> Option<Self> {
        let lower = url.to_ascii_lowercase();
        if lower.contains("tiktok") {
            Some(Self::TikTok)
        } else if lower.contains("instagram") {
            Some(Self::Instagram)
        } else {
            None
        }
    }
}

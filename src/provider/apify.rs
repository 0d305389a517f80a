use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::model::EngagementMetrics;
use crate::provider::{FetchedMetrics, MetricsProvider, Platform};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

/// Where each counter lives in a platform's scraper output.
struct FieldMap {
    actor: &'static str,
    views: &'static str,
    comments: &'static str,
    likes: &'static str,
    /// `None` when the platform's scraper does not report shares.
    shares: Option<&'static str>,
}

static TIKTOK_FIELDS: FieldMap = FieldMap {
    actor: "clockworks/free-tiktok-scraper",
    views: "playCount",
    comments: "commentCount",
    likes: "diggCount",
    shares: Some("shareCount"),
};

static INSTAGRAM_FIELDS: FieldMap = FieldMap {
    actor: "apify/instagram-scraper",
    views: "videoPlayCount",
    comments: "commentsCount",
    likes: "likesCount",
    shares: None,
};

fn fields_for(platform: Platform) -> &'static FieldMap {
    match platform {
        Platform::TikTok => &TIKTOK_FIELDS,
        Platform::Instagram => &INSTAGRAM_FIELDS,
    }
}

fn actor_input(platform: Platform, url: &str) -> Value {
    match platform {
        Platform::TikTok => json!({
            "excludePinnedPosts": true,
            "postURLs": [url],
            "resultsPerPage": 1,
            "shouldDownloadCovers": false,
            "shouldDownloadSlideshowImages": false,
            "shouldDownloadSubtitles": false,
            "shouldDownloadVideos": false,
        }),
        Platform::Instagram => json!({
            "addParentData": false,
            "directUrls": [url],
            "resultsLimit": 1,
            "resultsType": "details",
        }),
    }
}

/// Fetches post metrics by running the platform's Apify actor synchronously.
pub struct ApifyProvider {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl ApifyProvider {
    pub fn new(config: &ProviderConfig, request_timeout: Duration) -> Result<Self> {
        let Some(api_token) = config.api_token.clone().filter(|t| !t.trim().is_empty()) else {
            bail!("provider.api_token is not set (or export APIFY_API_KEY)");
        };
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("building Apify HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    fn run_url(&self, actor: &str) -> String {
        format!(
            "{}/v2/acts/{}/run-sync-get-dataset-items",
            self.base_url,
            actor.replace('/', "~")
        )
    }
}

#[async_trait]
impl MetricsProvider for ApifyProvider {
    async fn fetch_metrics(&self, video_id: &str) -> Result<FetchedMetrics, ProviderError> {
        let platform = Platform::detect(video_id).ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::UnsupportedUrl,
                video_id,
                "not a TikTok or Instagram URL",
            )
        })?;
        let fields = fields_for(platform);

        let response = self
            .client
            .post(self.run_url(fields.actor))
            .bearer_auth(&self.api_token)
            .json(&actor_input(platform, video_id))
            .send()
            .await
            .map_err(|e| classify_transport(video_id, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(video_id, status));
        }

        let body: Value = response.json().await.map_err(|e| {
            ProviderError::new(ProviderErrorKind::Malformed, video_id, format!("invalid JSON: {e}"))
        })?;
        parse_dataset(platform, video_id, &body)
    }

    fn name(&self) -> &str {
        "apify"
    }
}

fn classify_transport(video_id: &str, err: &reqwest::Error) -> ProviderError {
    let kind = if err.is_timeout() {
        ProviderErrorKind::Timeout
    } else {
        ProviderErrorKind::Transport
    };
    ProviderError::new(kind, video_id, err.to_string())
}

fn classify_status(video_id: &str, status: StatusCode) -> ProviderError {
    let kind = match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderErrorKind::Timeout,
        StatusCode::TOO_MANY_REQUESTS => ProviderErrorKind::RateLimited,
        s if s.is_server_error() => ProviderErrorKind::Server,
        _ => ProviderErrorKind::Rejected,
    };
    ProviderError::new(kind, video_id, format!("HTTP {status}"))
}

/// Validate the actor's dataset output into typed metrics.
fn parse_dataset(
    platform: Platform,
    video_id: &str,
    body: &Value,
) -> Result<FetchedMetrics, ProviderError> {
    let malformed = |msg: String| ProviderError::new(ProviderErrorKind::Malformed, video_id, msg);

    let item = body
        .as_array()
        .and_then(|items| items.first())
        .ok_or_else(|| malformed("empty dataset".into()))?;

    let count = |key: &str| -> Result<u64, ProviderError> {
        item.get(key)
            .and_then(Value::as_u64)
            .ok_or_else(|| malformed(format!("missing or non-numeric {key}")))
    };

    let fields = fields_for(platform);
    let shares = match fields.shares {
        Some(key) => count(key)?,
        None => 0,
    };
    let metrics = EngagementMetrics {
        views: count(fields.views)?,
        comments: count(fields.comments)?,
        likes: count(fields.likes)?,
        shares,
    };

    let creator = match platform {
        Platform::TikTok => item.pointer("/authorMeta/name"),
        Platform::Instagram => item.get("ownerUsername"),
    }
    .and_then(Value::as_str)
    .map(str::to_string);

    Ok(FetchedMetrics { metrics, creator })
}

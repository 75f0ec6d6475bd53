//! Fetches the watch page and extracts what the session needs to start
//! polling (§4, BootstrapClient contract).

use crate::config;
use crate::error::CoreError;
use crate::upstream::types;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Everything a freshly attached [`crate::session`] needs to issue its
/// first poll.
#[derive(Debug, Clone)]
pub struct BootstrapData {
    pub api_key: String,
    pub client_version: String,
    pub visitor_data: String,
    pub initial_continuation: Option<String>,
}

static INITIAL_DATA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)var ytInitialData\s*=\s*(\{.*?\});</script>"#).unwrap()
});

static API_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""INNERTUBE_API_KEY":"([^"]+)""#).unwrap());

static CLIENT_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""INNERTUBE_CLIENT_VERSION":"([^"]+)""#).unwrap());

static VISITOR_DATA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""VISITOR_DATA":"([^"]+)""#).unwrap());

/// Capability a session needs to (re-)bootstrap itself (§4, §4.5.1). The
/// production implementation scrapes the real watch page; tests substitute
/// a scripted fake, same trait-object pattern as [`crate::upstream::UpstreamPoller`].
#[async_trait]
pub trait BootstrapClient: Send + Sync {
    async fn scrape(&self, video_id: &str) -> Result<BootstrapData, CoreError>;
}

/// Real bootstrap client: scrapes the watch page over HTTP.
pub struct HttpBootstrapClient {
    pub client: reqwest::Client,
}

impl HttpBootstrapClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BootstrapClient for HttpBootstrapClient {
    async fn scrape(&self, video_id: &str) -> Result<BootstrapData, CoreError> {
        scrape(&self.client, video_id).await
    }
}

/// Scrapes the watch page for `video_id` and derives a [`BootstrapData`].
/// Stateless and safe to call concurrently; auto-heal (§4.5.1) calls it
/// again unchanged.
pub async fn scrape(client: &reqwest::Client, video_id: &str) -> Result<BootstrapData, CoreError> {
    let url = format!("https://www.youtube.com/watch?v={video_id}&hl=en&gl=US");

    let response = tokio::time::timeout(
        config::upstream_timeout(),
        client
            .get(&url)
            .header(
                "User-Agent",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
            )
            .send(),
    )
    .await
    .map_err(|_| CoreError::BootstrapFailed {
        video_id: video_id.to_string(),
        reason: "timed out fetching watch page".to_string(),
    })?
    .map_err(|e| CoreError::BootstrapFailed {
        video_id: video_id.to_string(),
        reason: e.to_string(),
    })?;

    if !response.status().is_success() {
        return Err(CoreError::BootstrapFailed {
            video_id: video_id.to_string(),
            reason: format!("watch page returned {}", response.status()),
        });
    }

    let html = response.text().await.map_err(|e| CoreError::BootstrapFailed {
        video_id: video_id.to_string(),
        reason: e.to_string(),
    })?;

    parse_watch_page(video_id, &html)
}

fn parse_watch_page(video_id: &str, html: &str) -> Result<BootstrapData, CoreError> {
    let fail = |reason: &str| CoreError::BootstrapFailed {
        video_id: video_id.to_string(),
        reason: reason.to_string(),
    };

    let api_key = API_KEY_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| fail("INNERTUBE_API_KEY not found in watch page"))?;

    let client_version = CLIENT_VERSION_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| fail("INNERTUBE_CLIENT_VERSION not found in watch page"))?;

    let initial_data_raw = INITIAL_DATA_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let initial_data: Option<Value> = initial_data_raw
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok());

    let visitor_data = VISITOR_DATA_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .or_else(|| {
            initial_data.as_ref().and_then(|v| {
                v.get("responseContext")
                    .and_then(|v| v.get("visitorData"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
        })
        .unwrap_or_default();

    let initial_continuation = initial_data.as_ref().and_then(|root| {
        types::find_typed_continuation(root)
            .map(|(_, token, _)| token)
            .or_else(|| types::find_fallback_continuation(root))
    });

    Ok(BootstrapData {
        api_key,
        client_version,
        visitor_data,
        initial_continuation,
    })
}

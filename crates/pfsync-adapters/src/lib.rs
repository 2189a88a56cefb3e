//! Upstream listing feed contracts: token, agent roster and paginated listings.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use pfsync_core::{FeedAgent, FeedListing};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "pfsync-adapters";

/// Listings requested per page.
pub const PAGE_SIZE: usize = 50;
const CLIENT_HEADER: &str = "X-PF-Client";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{endpoint} returned status {status}: {body}")]
    HttpStatus {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
}

#[async_trait]
pub trait ListingFeed: Send + Sync {
    /// Short-lived bearer credential; never refreshed mid-pass.
    async fn access_token(&self) -> Result<String, FeedError>;

    async fn fetch_agents(&self, token: &str) -> Result<Vec<FeedAgent>, FeedError>;

    /// One page (1-based) of at most [`PAGE_SIZE`] listings.
    async fn fetch_listings_page(
        &self,
        token: &str,
        page: usize,
    ) -> Result<Vec<FeedListing>, FeedError>;
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub api_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub timeout: Duration,
}

impl FeedConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("PF_API_URL").unwrap_or_default(),
            api_key: std::env::var("PF_API_KEY").unwrap_or_default(),
            api_secret: std::env::var("PF_API_SECRET").unwrap_or_default(),
            timeout: Duration::from_secs(
                std::env::var("PF_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    api_key: &'a str,
    api_secret: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    #[allow(dead_code)]
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct AgentsResponse {
    #[serde(default)]
    data: Vec<FeedAgent>,
}

#[derive(Debug, Deserialize)]
struct ListingsResponse {
    #[serde(default)]
    results: Vec<FeedListing>,
}

/// HTTP client for the live feed API.
#[derive(Debug)]
pub struct HttpListingFeed {
    client: reqwest::Client,
    config: FeedConfig,
}

impl HttpListingFeed {
    pub fn new(config: FeedConfig) -> Result<Self> {
        if config.api_url.is_empty() {
            anyhow::bail!("PF_API_URL is empty");
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building feed http client")?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn read_json<T: DeserializeOwned>(
        endpoint: &'static str,
        resp: reqwest::Response,
    ) -> Result<T, FeedError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::HttpStatus {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl ListingFeed for HttpListingFeed {
    async fn access_token(&self) -> Result<String, FeedError> {
        let resp = self
            .client
            .post(self.endpoint("auth/token"))
            .header(CLIENT_HEADER, &self.config.api_key)
            .json(&TokenRequest {
                api_key: &self.config.api_key,
                api_secret: &self.config.api_secret,
            })
            .send()
            .await?;
        let token: TokenResponse = Self::read_json("auth/token", resp).await?;
        Ok(token.access_token)
    }

    async fn fetch_agents(&self, token: &str) -> Result<Vec<FeedAgent>, FeedError> {
        let resp = self
            .client
            .get(self.endpoint("users"))
            .bearer_auth(token)
            .header(CLIENT_HEADER, &self.config.api_key)
            .send()
            .await?;
        let agents: AgentsResponse = Self::read_json("users", resp).await?;
        debug!(agents = agents.data.len(), "fetched agent roster");
        Ok(agents.data)
    }

    async fn fetch_listings_page(
        &self,
        token: &str,
        page: usize,
    ) -> Result<Vec<FeedListing>, FeedError> {
        let resp = self
            .client
            .get(self.endpoint("listings"))
            .bearer_auth(token)
            .header(CLIENT_HEADER, &self.config.api_key)
            .query(&[("page", page.to_string()), ("perPage", PAGE_SIZE.to_string())])
            .send()
            .await?;
        let listings: ListingsResponse = Self::read_json("listings", resp).await?;
        debug!(page, listings = listings.results.len(), "fetched listings page");
        Ok(listings.results)
    }
}

/// Feed snapshot captured to disk: the roster plus every listing, paged in memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureFeed {
    #[serde(default)]
    pub agents: Vec<FeedAgent>,
    #[serde(default)]
    pub listings: Vec<FeedListing>,
}

impl FixtureFeed {
    pub fn new(agents: Vec<FeedAgent>, listings: Vec<FeedListing>) -> Self {
        Self { agents, listings }
    }
}

pub fn load_fixture_feed(path: impl AsRef<Path>) -> Result<FixtureFeed> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

#[async_trait]
impl ListingFeed for FixtureFeed {
    async fn access_token(&self) -> Result<String, FeedError> {
        Ok("fixture-token".to_string())
    }

    async fn fetch_agents(&self, _token: &str) -> Result<Vec<FeedAgent>, FeedError> {
        Ok(self.agents.clone())
    }

    async fn fetch_listings_page(
        &self,
        _token: &str,
        page: usize,
    ) -> Result<Vec<FeedListing>, FeedError> {
        let start = page.saturating_sub(1).saturating_mul(PAGE_SIZE);
        Ok(self
            .listings
            .iter()
            .skip(start)
            .take(PAGE_SIZE)
            .cloned()
            .collect())
    }
}

/// Collect pages until a short or empty page, a failed page, or `max_pages`.
///
/// A failure on the first page is returned; later failures keep what was fetched.
pub async fn fetch_all_listings(
    feed: &dyn ListingFeed,
    token: &str,
    max_pages: usize,
) -> Result<Vec<FeedListing>, FeedError> {
    let mut all = Vec::new();
    for page in 1..=max_pages.max(1) {
        let batch = match feed.fetch_listings_page(token, page).await {
            Ok(batch) => batch,
            Err(err) if page == 1 => return Err(err),
            Err(err) => {
                tracing::warn!(page, error = %err, "listing page fetch failed; stopping pagination");
                break;
            }
        };
        let short = batch.len() < PAGE_SIZE;
        all.extend(batch);
        if short {
            break;
        }
    }
    Ok(all)
}

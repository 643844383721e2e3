//! Client for the upstream content site: post listings and post details.

pub mod detail;
pub mod models;
pub mod posts;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::constants::browser_headers;
use crate::error::{Error, Result};
use crate::rate_limiter::RateLimiter;

pub use detail::{ExtractionStrategy, DETAIL_CASCADE};
pub use models::{Attachment, FileLink, Locator, Post, PostDetail, PostId, PublishedAt};
pub use posts::normalize_listing;

/// Build the shared HTTP client used for every upstream request.
///
/// The client carries the browser header set and keeps connections alive
/// between requests. Only connecting is bounded by a timeout; a download
/// may legitimately take a long time once it has started.
///
/// # Errors
///
/// Returns an error if the site base URL is not a valid header value or the
/// client cannot be built.
pub fn build_http_client(config: &Config) -> Result<reqwest::Client> {
    let referer = format!("{}/", config.site_base);
    let headers = browser_headers(&referer).map_err(|e| Error::Validation {
        field: "UPSTREAM_SITE_BASE",
        message: e.to_string(),
    })?;

    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(config.connect_timeout)
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|e| Error::transport(&config.site_base, e))
}

/// Rate-limited access to the upstream listing and detail endpoints.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    config: Arc<Config>,
    limiter: Arc<RateLimiter>,
}

impl UpstreamClient {
    #[must_use]
    pub fn new(http: reqwest::Client, config: Arc<Config>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            http,
            config,
            limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn creator_path(&self) -> String {
        format!("{}/user/{}", self.config.service, self.config.creator_id)
    }

    pub(crate) fn listing_url(&self, offset: u64) -> String {
        format!(
            "{}/{}/posts-legacy?o={offset}&limit={}",
            self.config.api_base,
            self.creator_path(),
            self.config.page_size
        )
    }

    pub(crate) fn api_post_url(&self, id: &PostId) -> String {
        format!("{}/{}/post/{id}", self.config.api_base, self.creator_path())
    }

    pub(crate) fn html_post_url(&self, id: &PostId) -> String {
        format!("{}/{}/post/{id}", self.config.site_base, self.creator_path())
    }

    /// GET a URL through the metadata limiter and return the body text.
    ///
    /// The whole exchange, body included, holds the limiter slot.
    async fn get_text(&self, url: &str) -> Result<String> {
        self.limiter
            .schedule(|| async move {
                debug!(url = %url, "Upstream GET");
                let response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| Error::transport(url, e))?;

                let status = response.status();
                if !status.is_success() {
                    return Err(Error::UpstreamStatus {
                        url: url.to_string(),
                        status,
                    });
                }

                response.text().await.map_err(|e| Error::transport(url, e))
            })
            .await
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|e| Error::shape(url, format!("invalid JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> UpstreamClient {
        let config = Config {
            creator_id: "22614979".to_string(),
            ..Config::for_testing().with_upstream("https://kemono.su")
        };
        let http = build_http_client(&config).unwrap();
        let limiter = Arc::new(RateLimiter::new("metadata", 1, Duration::ZERO));
        UpstreamClient::new(http, Arc::new(config), limiter)
    }

    #[test]
    fn test_endpoint_urls() {
        let client = client();
        let id = PostId::parse("98765").unwrap();
        assert_eq!(
            client.listing_url(50),
            "https://kemono.su/api/v1/patreon/user/22614979/posts-legacy?o=50&limit=50"
        );
        assert_eq!(
            client.api_post_url(&id),
            "https://kemono.su/api/v1/patreon/user/22614979/post/98765"
        );
        assert_eq!(
            client.html_post_url(&id),
            "https://kemono.su/patreon/user/22614979/post/98765"
        );
    }
}

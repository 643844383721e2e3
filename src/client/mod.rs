//! Client for a running harvester server's HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::{DownloadRequest, DownloadResponse, ErrorResponse};
use crate::error::{Error, Result};
use crate::queue::{DownloadSink, ItemFailure, QueueItem};
use crate::upstream::{Post, PostDetail, PostId};

/// Files found across a set of posts, plus the posts that could not be read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub files: Vec<QueueItem>,
    /// Post ids whose lookup failed, with the reason.
    pub failures: Vec<ItemFailure>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    /// Create a client for the server at `base`, e.g. `http://127.0.0.1:3000`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base` is not a valid URL or the HTTP client
    /// cannot be built.
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(&format!("{}/", base.trim_end_matches('/'))).map_err(|e| {
            Error::Validation {
                field: "server",
                message: e.to_string(),
            }
        })?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::transport(base.as_str(), e))?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base.join(path).map_err(|e| Error::Validation {
            field: "path",
            message: e.to_string(),
        })
    }

    /// One page of posts starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server reports one.
    pub async fn posts(&self, offset: u64) -> Result<Vec<Post>> {
        let mut url = self.endpoint("api/posts")?;
        url.query_pairs_mut()
            .append_pair("offset", &offset.to_string());
        self.read_json(self.http.get(url.clone()), &url).await
    }

    /// Page through every post, `page_size` at a time, until an empty page.
    ///
    /// # Errors
    ///
    /// Returns the first page error.
    pub async fn all_posts(&self, page_size: u64) -> Result<Vec<Post>> {
        let page_size = page_size.max(1);
        let mut offset = 0;
        let mut all = Vec::new();

        loop {
            let page = self.posts(offset).await?;
            if page.is_empty() {
                debug!(offset, total = all.len(), "Reached the last page");
                return Ok(all);
            }
            all.extend(page);
            offset += page_size;
        }
    }

    /// Details and matching files of one post.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server reports one.
    pub async fn post_detail(&self, post_id: &str) -> Result<PostDetail> {
        let post_id = PostId::parse(post_id)?;
        let url = self.endpoint(&format!("api/post/{post_id}"))?;
        self.read_json(self.http.get(url.clone()), &url).await
    }

    /// Ask the server to store `url` as `filename`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server reports one.
    pub async fn download(&self, url: &str, filename: &str) -> Result<DownloadResponse> {
        let endpoint = self.endpoint("api/download")?;
        let body = DownloadRequest {
            url: Some(url.to_string()),
            filename: Some(filename.to_string()),
        };
        let response: DownloadResponse = self
            .read_json(self.http.post(endpoint.clone()).json(&body), &endpoint)
            .await?;

        if response.success {
            Ok(response)
        } else {
            Err(Error::Server {
                status: reqwest::StatusCode::OK,
                message: response.message,
            })
        }
    }

    /// Look up each post in turn and collect its files.
    ///
    /// A post that fails is recorded in the report; the others are still
    /// scanned.
    pub async fn scan<I, S>(&self, post_ids: I) -> ScanReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = ScanReport::default();

        for post_id in post_ids {
            let post_id = post_id.as_ref();
            match self.post_detail(post_id).await {
                Ok(detail) => {
                    info!(post_id, files = detail.files.len(), "Scanned post");
                    report
                        .files
                        .extend(detail.files.into_iter().map(|file| QueueItem {
                            name: file.name,
                            url: file.url,
                            post_id: Some(detail.id.to_string()),
                            post_title: Some(detail.title.clone()),
                        }));
                }
                Err(e) => {
                    warn!(post_id, error = %e, "Failed to scan post");
                    report.failures.push(ItemFailure {
                        name: post_id.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        url: &Url,
    ) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::transport(url.as_str(), e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(url.as_str(), e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map_or_else(|_| body.clone(), |e| e.error);
            return Err(Error::Server { status, message });
        }

        serde_json::from_str(&body).map_err(|e| Error::shape(url.as_str(), e.to_string()))
    }
}

#[async_trait]
impl DownloadSink for ApiClient {
    async fn download(&self, item: &QueueItem) -> Result<String> {
        Ok(ApiClient::download(self, &item.url, &item.name).await?.path)
    }
}


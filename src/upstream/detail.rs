//! Post detail lookup with an ordered cascade of extraction strategies.
//!
//! Each strategy fetches one upstream representation of a post and turns it
//! into an [`Extracted`] value. The parsers are plain functions so they can be
//! tested against captured payloads without a network.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use super::models::{title_or_default, Attachment, FileLink, PostDetail, PostId};
use super::UpstreamClient;
use crate::error::{Error, Result};

static ATTACHMENT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".post__attachment").expect("valid selector"));
static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));
static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".post__title").expect("valid selector"));
static CONTENT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".post__content").expect("valid selector"));

/// A source of attachment metadata for a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    /// The structured per-post JSON endpoint.
    Api,
    /// The post's HTML page.
    Html,
}

impl ExtractionStrategy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Html => "html",
        }
    }
}

/// Strategies tried, in order, until one yields matching files.
pub const DETAIL_CASCADE: [ExtractionStrategy; 2] =
    [ExtractionStrategy::Api, ExtractionStrategy::Html];

/// What a single strategy found, before extension filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub title: Option<String>,
    pub content: Option<String>,
    pub files: Vec<FileLink>,
}

impl UpstreamClient {
    /// Look up a post and the files attached to it that carry the target
    /// extension.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed ids, a transport error if the
    /// last stage fails at the network level, or the last stage's error when
    /// no stage produced a usable answer.
    pub async fn fetch_post_detail(&self, post_id: &str) -> Result<PostDetail> {
        let id = PostId::parse(post_id)?;
        self.resolve_detail(&id, &DETAIL_CASCADE).await
    }

    /// Run `cascade` for `id`.
    ///
    /// A stage that answers with a non-success status, an unexpected shape,
    /// or no matching files hands over to the next stage. So does a network
    /// failure, unless it happens on the last stage.
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::fetch_post_detail`].
    pub async fn resolve_detail(
        &self,
        id: &PostId,
        cascade: &[ExtractionStrategy],
    ) -> Result<PostDetail> {
        let extension = self.config().target_extension.clone();
        let mut title: Option<String> = None;
        let mut content: Option<String> = None;
        let mut answered = false;
        let mut last_error = None;

        for (index, strategy) in cascade.iter().enumerate() {
            let has_next = index + 1 < cascade.len();
            let extracted = match self.run_strategy(*strategy, id).await {
                Ok(extracted) => extracted,
                Err(e) if e.is_fallback_trigger() || (has_next && e.is_transport()) => {
                    warn!(
                        post_id = %id,
                        strategy = strategy.as_str(),
                        error = %e,
                        "Detail strategy failed, trying next"
                    );
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            answered = true;

            title = title.or(extracted.title);
            content = content.or(extracted.content);

            let files = filter_by_extension(extracted.files, &extension);
            if !files.is_empty() {
                info!(
                    post_id = %id,
                    strategy = strategy.as_str(),
                    files = files.len(),
                    "Resolved post attachments"
                );
                return Ok(PostDetail {
                    id: id.clone(),
                    title: title_or_default(title.as_deref()),
                    content: content.unwrap_or_default(),
                    files,
                });
            }

            debug!(
                post_id = %id,
                strategy = strategy.as_str(),
                "No matching attachments, trying next strategy"
            );
        }

        if !answered {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        Ok(PostDetail {
            id: id.clone(),
            title: title_or_default(title.as_deref()),
            content: content.unwrap_or_default(),
            files: Vec::new(),
        })
    }

    async fn run_strategy(&self, strategy: ExtractionStrategy, id: &PostId) -> Result<Extracted> {
        match strategy {
            ExtractionStrategy::Api => {
                let url = self.api_post_url(id);
                let body = self.get_json(&url).await?;
                extract_from_api(&body, &self.config().media_base)
                    .map_err(|message| Error::shape(&url, message))
            }
            ExtractionStrategy::Html => {
                let url = self.html_post_url(id);
                let body = self.get_text(&url).await?;
                Ok(extract_from_html(&body, &self.config().site_base))
            }
        }
    }
}

/// Keep only files whose name ends with `extension`, ignoring case.
#[must_use]
pub fn filter_by_extension(files: Vec<FileLink>, extension: &str) -> Vec<FileLink> {
    let extension = extension.to_lowercase();
    files
        .into_iter()
        .filter(|file| file.name.to_lowercase().ends_with(&extension))
        .collect()
}

/// Parse the per-post API response.
///
/// Known shapes: the post object itself, `{"post": {...}, "attachments": [...]}`,
/// or a list holding the post. Attachments are collected from the top-level
/// `attachments`, the post's `attachments`, and the post's single `file`, in
/// that order, without duplicates.
///
/// # Errors
///
/// Returns a description of the problem if no post object can be found.
pub fn extract_from_api(body: &Value, media_base: &str) -> std::result::Result<Extracted, String> {
    let (post, wrapper) = locate_post(body)?;

    let mut attachment_values: Vec<&Value> = Vec::new();
    if let Some(wrapper) = wrapper {
        if let Some(Value::Array(list)) = wrapper.get("attachments") {
            attachment_values.extend(list);
        }
    }
    if let Some(Value::Array(list)) = post.get("attachments") {
        attachment_values.extend(list);
    }
    if let Some(file) = post.get("file") {
        attachment_values.push(file);
    }

    let mut seen = HashSet::new();
    let files = attachment_values
        .into_iter()
        .filter_map(Value::as_object)
        .filter_map(Attachment::from_upstream)
        .map(|attachment| attachment.into_file_link(media_base))
        .filter(|file| seen.insert(file.url.clone()))
        .collect();

    Ok(Extracted {
        title: non_empty(post.get("title").and_then(Value::as_str)),
        content: non_empty(post.get("content").and_then(Value::as_str)),
        files,
    })
}

/// Find the post object, and the wrapper around it if there is one.
fn locate_post(
    body: &Value,
) -> std::result::Result<(&Map<String, Value>, Option<&Map<String, Value>>), String> {
    match body {
        Value::Object(map) => match map.get("post") {
            Some(Value::Object(post)) => Ok((post, Some(map))),
            _ => Ok((map, None)),
        },
        Value::Array(list) => match list.first() {
            Some(Value::Object(post)) => Ok((post, None)),
            Some(_) => Err("post list entry is not an object".to_string()),
            None => Err("post list is empty".to_string()),
        },
        _ => Err("expected a post object".to_string()),
    }
}

/// Parse a post's HTML page.
///
/// Each `.post__attachment` element contributes its first link: the visible
/// text is the name (falling back to the `download` attribute) and the href,
/// resolved against `site_base`, is the URL.
#[must_use]
pub fn extract_from_html(html: &str, site_base: &str) -> Extracted {
    let document = Html::parse_document(html);
    let base = Url::parse(&format!("{}/", site_base.trim_end_matches('/'))).ok();

    let files = document
        .select(&ATTACHMENT_SELECTOR)
        .filter_map(|attachment| attachment.select(&LINK_SELECTOR).next())
        .filter_map(|link| file_link_from_anchor(&link, base.as_ref()))
        .collect();

    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let content = document
        .select(&CONTENT_SELECTOR)
        .next()
        .map(|el| el.inner_html().trim().to_string())
        .filter(|c| !c.is_empty());

    Extracted {
        title,
        content,
        files,
    }
}

fn file_link_from_anchor(link: &ElementRef, base: Option<&Url>) -> Option<FileLink> {
    let href = link.value().attr("href")?.trim();
    if href.is_empty() {
        return None;
    }

    let text = collapse_whitespace(&link.text().collect::<String>());
    let name = if text.is_empty() {
        link.value().attr("download")?.trim().to_string()
    } else {
        text
    };
    if name.is_empty() {
        return None;
    }

    let url = match Url::parse(href) {
        Ok(url) => url.to_string(),
        Err(_) => base?.join(href).ok()?.to_string(),
    };

    Some(FileLink { name, url })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

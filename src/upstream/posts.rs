use serde_json::Value;
use tracing::{debug, info};

use super::models::Post;
use super::UpstreamClient;
use crate::error::{Error, Result};

impl UpstreamClient {
    /// Fetch one page of the creator's posts starting at `offset`.
    ///
    /// An empty list means there are no more pages.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the upstream answers with a
    /// non-success status, or the body is not a recognizable listing.
    pub async fn fetch_posts(&self, offset: u64) -> Result<Vec<Post>> {
        let url = self.listing_url(offset);
        info!(offset, url = %url, "Fetching post listing");

        let body = self.get_json(&url).await?;
        let posts = normalize_listing(&body).map_err(|message| Error::shape(&url, message))?;

        debug!(offset, count = posts.len(), "Fetched post listing");
        Ok(posts)
    }
}

/// Flatten a listing body into an ordered list of posts.
///
/// Accepts either a bare JSON list or an object wrapping the list in
/// `results`. Entries without an id are skipped.
///
/// # Errors
///
/// Returns a description of the problem when the body is neither shape or an
/// entry is not an object.
pub fn normalize_listing(body: &Value) -> std::result::Result<Vec<Post>, String> {
    let entries = match body {
        Value::Array(entries) => entries,
        Value::Object(map) => match map.get("results") {
            Some(Value::Array(entries)) => entries,
            Some(Value::Null) => return Ok(Vec::new()),
            Some(_) => return Err("`results` is not a list".to_string()),
            None => return Err("expected a list or an object with `results`".to_string()),
        },
        _ => return Err("expected a list or an object with `results`".to_string()),
    };

    let mut posts = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let Value::Object(entry) = entry else {
            return Err(format!("listing entry {index} is not an object"));
        };
        match Post::from_upstream(entry) {
            Some(post) => posts.push(post),
            None => debug!(index, "Skipping listing entry without an id"),
        }
    }

    Ok(posts)
}

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::UNTITLED_POST;
use crate::error::{Error, Result};

/// Upstream post identifier.
///
/// The upstream sends ids as strings in some API revisions and as numbers in
/// others; both are carried as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    /// Validate a caller-supplied id before it is placed in an upstream URL.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty ids or ids containing anything
    /// other than ASCII alphanumerics, `-` and `_`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::Validation {
                field: "post id",
                message: "is required".to_string(),
            });
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Validation {
                field: "post id",
                message: format!("'{raw}' contains unsupported characters"),
            });
        }
        Ok(Self(raw.to_string()))
    }

    /// Read an id from an upstream JSON value (string or integer).
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A post's publication time, tagged with the format it arrived in.
///
/// Listing variants disagree on whether the time is an ISO-8601 string
/// (`published`) or Unix seconds (`added`), so the raw value is kept along
/// with its format instead of being coerced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", content = "value", rename_all = "snake_case")]
pub enum PublishedAt {
    Iso8601(String),
    UnixSeconds(i64),
}

impl PublishedAt {
    /// Read the timestamp from a post object, preferring `published`.
    #[must_use]
    pub fn from_post(post: &Map<String, Value>) -> Option<Self> {
        ["published", "added"]
            .iter()
            .filter_map(|field| post.get(*field))
            .find_map(Self::from_value)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self::Iso8601(s.trim().to_string())),
            Value::Number(n) => n.as_i64().map(Self::UnixSeconds),
            _ => None,
        }
    }

    /// Best-effort conversion for display. ISO strings without an offset
    /// are read as UTC.
    #[must_use]
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Iso8601(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                        .ok()
                        .map(|naive| naive.and_utc())
                }),
            Self::UnixSeconds(secs) => DateTime::from_timestamp(*secs, 0),
        }
    }
}

/// A post as listed on a creator's page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub published_at: Option<PublishedAt>,
}

impl Post {
    /// Build a post from one upstream listing entry. Returns `None` when the
    /// entry has no usable id.
    #[must_use]
    pub fn from_upstream(entry: &Map<String, Value>) -> Option<Self> {
        let id = entry.get("id").and_then(PostId::from_value)?;
        Some(Self {
            id,
            title: title_or_default(entry.get("title").and_then(Value::as_str)),
            published_at: PublishedAt::from_post(entry),
        })
    }
}

/// Where an attachment's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Already a full URL.
    Absolute(String),
    /// Path relative to the media base URL.
    Relative(String),
    /// Path on a specific media server.
    Hosted { server: String, path: String },
}

impl Locator {
    /// Classify a `path` (and optional `server`) pair from the upstream API.
    #[must_use]
    pub fn from_parts(path: &str, server: Option<&str>) -> Self {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Self::Absolute(path.to_string());
        }
        match server.map(str::trim).filter(|s| !s.is_empty()) {
            Some(server) => Self::Hosted {
                server: server.to_string(),
                path: path.to_string(),
            },
            None => Self::Relative(path.to_string()),
        }
    }

    #[must_use]
    pub fn resolve(&self, media_base: &str) -> String {
        match self {
            Self::Absolute(url) => url.clone(),
            Self::Relative(path) => format!(
                "{}/{}",
                media_base.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
            Self::Hosted { server, path } => format!(
                "{}/data/{}",
                server.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
        }
    }
}

/// A file reference found in a post's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub locator: Locator,
}

impl Attachment {
    /// Read an attachment object (`{name, path, server?}`).
    #[must_use]
    pub fn from_upstream(entry: &Map<String, Value>) -> Option<Self> {
        let name = entry.get("name").and_then(Value::as_str)?.trim();
        let path = entry.get("path").and_then(Value::as_str)?.trim();
        if name.is_empty() || path.is_empty() {
            return None;
        }
        let server = entry.get("server").and_then(Value::as_str);
        Some(Self {
            name: name.to_string(),
            locator: Locator::from_parts(path, server),
        })
    }

    #[must_use]
    pub fn into_file_link(self, media_base: &str) -> FileLink {
        FileLink {
            url: self.locator.resolve(media_base),
            name: self.name,
        }
    }
}

/// A resolved, downloadable file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileLink {
    pub name: String,
    pub url: String,
}

/// A post's details with its files filtered to the target extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDetail {
    pub id: PostId,
    pub title: String,
    pub content: String,
    pub files: Vec<FileLink>,
}

pub(crate) fn title_or_default(title: Option<&str>) -> String {
    title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map_or_else(|| UNTITLED_POST.to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_post_id_from_value() {
        assert_eq!(
            PostId::from_value(&json!("98765")).unwrap().as_str(),
            "98765"
        );
        assert_eq!(PostId::from_value(&json!(98765)).unwrap().as_str(), "98765");
        assert!(PostId::from_value(&json!("")).is_none());
        assert!(PostId::from_value(&json!(null)).is_none());
    }

    #[test]
    fn test_post_id_parse() {
        assert_eq!(PostId::parse(" 123 ").unwrap().as_str(), "123");
        assert!(PostId::parse("").is_err());
        assert!(PostId::parse("../admin").is_err());
        assert!(PostId::parse("1?o=2").is_err());
    }

    #[test]
    fn test_published_at_prefers_published() {
        let post = object(json!({"published": "2024-03-01T10:00:00", "added": 1_700_000_000}));
        assert_eq!(
            PublishedAt::from_post(&post),
            Some(PublishedAt::Iso8601("2024-03-01T10:00:00".to_string()))
        );

        let post = object(json!({"published": null, "added": 1_700_000_000}));
        assert_eq!(
            PublishedAt::from_post(&post),
            Some(PublishedAt::UnixSeconds(1_700_000_000))
        );

        assert_eq!(PublishedAt::from_post(&object(json!({}))), None);
    }

    #[test]
    fn test_published_at_to_utc() {
        let naive = PublishedAt::Iso8601("2024-03-01T10:00:00".to_string());
        assert_eq!(
            naive.to_utc().unwrap().to_rfc3339(),
            "2024-03-01T10:00:00+00:00"
        );

        let offset = PublishedAt::Iso8601("2024-03-01T12:00:00+02:00".to_string());
        assert_eq!(
            offset.to_utc().unwrap().to_rfc3339(),
            "2024-03-01T10:00:00+00:00"
        );

        let unix = PublishedAt::UnixSeconds(0);
        assert_eq!(unix.to_utc().unwrap().to_rfc3339(), "1970-01-01T00:00:00+00:00");

        assert!(PublishedAt::Iso8601("yesterday".to_string()).to_utc().is_none());
    }

    #[test]
    fn test_published_at_serialization_is_tagged() {
        let value = serde_json::to_value(PublishedAt::UnixSeconds(42)).unwrap();
        assert_eq!(value, json!({"format": "unix_seconds", "value": 42}));
    }

    #[test]
    fn test_post_from_upstream_defaults_title() {
        let post = Post::from_upstream(&object(json!({"id": 7, "title": "  "}))).unwrap();
        assert_eq!(post.id.as_str(), "7");
        assert_eq!(post.title, UNTITLED_POST);
        assert!(post.published_at.is_none());

        assert!(Post::from_upstream(&object(json!({"title": "no id"}))).is_none());
    }

    #[test]
    fn test_locator_resolution() {
        let media = "https://kemono.su/data";
        assert_eq!(
            Locator::from_parts("/ab/cd/file.pdf", None).resolve(media),
            "https://kemono.su/data/ab/cd/file.pdf"
        );
        assert_eq!(
            Locator::from_parts("/ab/file.pdf", Some("https://n1.kemono.su")).resolve(media),
            "https://n1.kemono.su/data/ab/file.pdf"
        );
        assert_eq!(
            Locator::from_parts("https://cdn.example.com/x.pdf", Some("https://n1")).resolve(media),
            "https://cdn.example.com/x.pdf"
        );
        assert_eq!(
            Locator::from_parts("/x.pdf", Some("")),
            Locator::Relative("/x.pdf".to_string())
        );
    }

    #[test]
    fn test_attachment_requires_name_and_path() {
        assert!(Attachment::from_upstream(&object(json!({"name": "a.pdf"}))).is_none());
        assert!(Attachment::from_upstream(&object(json!({"path": "/a.pdf"}))).is_none());
        let attachment =
            Attachment::from_upstream(&object(json!({"name": "a.pdf", "path": "/a.pdf"}))).unwrap();
        assert_eq!(attachment.name, "a.pdf");
    }
}

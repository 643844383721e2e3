//! Request and response bodies of the HTTP surface, shared by the server and
//! the API client.

use serde::{Deserialize, Serialize};

use crate::queue::QueueItem;

/// Query of `GET /api/posts`. A missing or unparseable offset means 0.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PostsQuery {
    #[serde(default)]
    pub offset: Option<String>,
}

impl PostsQuery {
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
            .as_deref()
            .and_then(|o| o.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Body of `POST /api/download`. Both fields are required; they are optional
/// here so a missing field is answered with a 400 and a JSON error.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DownloadResponse {
    pub success: bool,
    pub message: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QueueRequest {
    #[serde(default)]
    pub files: Vec<QueueItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueueAccepted {
    pub accepted: usize,
}

//! Error taxonomy shared by the library modules.

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Network or HTTP-layer failure talking to a remote host, including
    /// mid-stream failures while downloading.
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The remote host answered with a non-success status.
    #[error("{url} returned status {status}")]
    UpstreamStatus { url: String, status: StatusCode },
    /// The response body did not have the expected shape.
    #[error("unexpected response from {url}: {message}")]
    Shape { url: String, message: String },
    /// A caller-supplied value was missing or unusable.
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("not found: {0}")]
    NotFound(String),
    /// The harvester's own server rejected an API call.
    #[error("server answered {status}: {message}")]
    Server { status: StatusCode, message: String },
    /// A queue run is already draining.
    #[error("a download run is already in progress")]
    QueueBusy,
    /// A background task ended without producing a result.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn transport(url: &str, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.to_string(),
            source,
        }
    }

    pub(crate) fn shape(url: &str, message: impl Into<String>) -> Self {
        Self::Shape {
            url: url.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Whether the detail cascade should move on to its next strategy
    /// instead of failing the whole lookup.
    #[must_use]
    pub fn is_fallback_trigger(&self) -> bool {
        matches!(self, Self::UpstreamStatus { .. } | Self::Shape { .. })
    }
}

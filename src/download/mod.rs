//! Idempotent on-disk cache of downloaded files.
//!
//! A file's presence under its sanitized name in the download directory means
//! it has been downloaded. Files are created once and never overwritten or
//! deleted. Bytes are streamed into a hidden temp file next to the target and
//! linked into place only when the stream completed, so a failed download
//! never leaves a partial file under the final name.

pub mod locks;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::rate_limiter::RateLimiter;

pub use locks::FilenameLocks;

/// A request to store `url` under `filename`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadJob {
    pub url: String,
    pub filename: String,
}

/// Outcome of a successful [`DownloadCache::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Sanitized name, unique within the download directory.
    pub filename: String,
    pub path: PathBuf,
    /// `false` when the file was already present and no request was made.
    pub fetched: bool,
}

impl StoredFile {
    #[must_use]
    pub fn message(&self) -> &'static str {
        if self.fetched {
            "File downloaded successfully"
        } else {
            "File already exists"
        }
    }
}

/// Reduce a caller-supplied filename to its final path segment.
///
/// Both `/` and `\` count as separators, so `../../etc/passwd` becomes
/// `passwd`.
///
/// # Errors
///
/// Returns a validation error if nothing usable is left.
pub fn sanitize_filename(raw: &str) -> Result<String> {
    let name = raw
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() || name == "." || name == ".." || name.contains('\0') {
        return Err(Error::Validation {
            field: "filename",
            message: format!("'{raw}' does not name a file"),
        });
    }

    Ok(name.to_string())
}

fn validate_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::Validation {
            field: "url",
            message: "is required".to_string(),
        });
    }
    let url = Url::parse(raw).map_err(|e| Error::Validation {
        field: "url",
        message: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Validation {
            field: "url",
            message: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(url)
}

/// Downloads files into a directory at most once per sanitized name.
#[derive(Debug, Clone)]
pub struct DownloadCache {
    dir: PathBuf,
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    locks: Arc<FilenameLocks>,
}

impl DownloadCache {
    /// Create a cache rooted at `dir`.
    ///
    /// `http` should carry the browser header set; `limiter` gates every
    /// network fetch.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, http: reqwest::Client, limiter: Arc<RateLimiter>) -> Self {
        Self {
            dir: dir.into(),
            http,
            limiter,
            locks: Arc::new(FilenameLocks::new()),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ensure `job.url` is stored under the sanitized `job.filename`.
    ///
    /// Returns immediately, without network access, if the file exists.
    /// Once a download has started it runs to completion even if the
    /// returned future is dropped.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unusable URL or filename, and a
    /// transport, status, or I/O error if the download fails. A panic in the
    /// download task surfaces as [`Error::Task`].
    pub async fn fetch(&self, job: &DownloadJob) -> Result<StoredFile> {
        let url = validate_url(&job.url)?;
        let filename = sanitize_filename(&job.filename)?;
        let path = self.dir.join(&filename);

        if self.exists(&path).await? {
            debug!(filename = %filename, "File already stored, skipping download");
            return Ok(StoredFile {
                filename,
                path,
                fetched: false,
            });
        }

        // The network part runs detached so that a caller going away (a
        // disconnected client, a timeout) only stops the wait. The download
        // itself still finishes and the file lands in the cache.
        let cache = self.clone();
        tokio::spawn(async move { cache.fetch_exclusive(url, filename, path).await }).await?
    }

    async fn fetch_exclusive(
        &self,
        url: Url,
        filename: String,
        path: PathBuf,
    ) -> Result<StoredFile> {
        let _guard = self.locks.acquire(&filename).await;

        // Someone holding the lock before us may have stored it
        if self.exists(&path).await? {
            debug!(filename = %filename, "File stored while waiting, skipping download");
            return Ok(StoredFile {
                filename,
                path,
                fetched: false,
            });
        }

        let fetched = self
            .limiter
            .schedule(|| self.stream_to_disk(&url, &path))
            .await?;

        if fetched {
            info!(filename = %filename, url = %url, "Downloaded file");
        }

        Ok(StoredFile {
            filename,
            path,
            fetched,
        })
    }

    /// Path of a stored file, if it exists.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `filename` is not a plain stored name or the file
    /// is absent.
    pub async fn stored_path(&self, filename: &str) -> Result<PathBuf> {
        let sanitized =
            sanitize_filename(filename).map_err(|_| Error::NotFound(filename.to_string()))?;
        if sanitized != filename {
            return Err(Error::NotFound(filename.to_string()));
        }

        let path = self.dir.join(&sanitized);
        if self.exists(&path).await? {
            Ok(path)
        } else {
            Err(Error::NotFound(sanitized))
        }
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| Error::io(path, e))
    }

    /// Stream `url` into `target`.
    ///
    /// Returns `false` if another writer created `target` first; the bytes
    /// fetched here are then discarded.
    async fn stream_to_disk(&self, url: &Url, target: &Path) -> Result<bool> {
        let url_str = url.as_str();
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::transport(url_str, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamStatus {
                url: url_str.to_string(),
                status,
            });
        }

        let temp = tempfile::Builder::new()
            .prefix(".download-")
            .suffix(".part")
            .tempfile_in(&self.dir)
            .map_err(|e| Error::io(&self.dir, e))?;
        let file = temp
            .as_file()
            .try_clone()
            .map_err(|e| Error::io(temp.path(), e))?;

        let mut writer = BufWriter::new(tokio::fs::File::from_std(file));
        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;

        // Returning early drops `temp`, which deletes the partial file.
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::transport(url_str, e))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| Error::io(temp.path(), e))?;
            bytes_written += chunk.len() as u64;
        }

        writer.flush().await.map_err(|e| Error::io(temp.path(), e))?;
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|e| Error::io(temp.path(), e))?;

        debug!(bytes = bytes_written, target = %target.display(), "Download stream complete");

        match temp.persist_noclobber(target) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                warn!(
                    target = %target.display(),
                    "File appeared during download, keeping the existing copy"
                );
                Ok(false)
            }
            Err(e) => Err(Error::io(target, e.error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("/abs/path/a.pdf").unwrap(), "a.pdf");
        assert_eq!(sanitize_filename("..\\..\\win.ini").unwrap(), "win.ini");
        assert_eq!(sanitize_filename("plain name.pdf").unwrap(), "plain name.pdf");
    }

    #[test]
    fn test_sanitize_rejects_empty_segments() {
        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("dir/").is_err());
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("a/.").is_err());
        assert!(sanitize_filename("   ").is_err());
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://kemono.su/data/a.pdf").is_ok());
        assert!(validate_url("").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn test_stored_file_message() {
        let stored = StoredFile {
            filename: "a.pdf".to_string(),
            path: PathBuf::from("a.pdf"),
            fetched: false,
        };
        assert_eq!(stored.message(), "File already exists");
    }
}

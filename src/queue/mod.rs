//! Sequential download queue with a fixed delay between items.
//!
//! One run drains the queue front to back with exactly one download in flight.
//! A failed item is recorded and the run moves on; it never aborts the batch.
//! A sink that panics counts as a failed item too.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::download::{DownloadCache, DownloadJob};
use crate::error::{Error, Result};

/// A discovered file waiting to be downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_title: Option<String>,
}

/// Something that can download one queue item.
#[async_trait]
pub trait DownloadSink: Send + Sync {
    /// Download `item`, returning the stored filename.
    async fn download(&self, item: &QueueItem) -> Result<String>;
}

#[async_trait]
impl DownloadSink for DownloadCache {
    async fn download(&self, item: &QueueItem) -> Result<String> {
        let job = DownloadJob {
            url: item.url.clone(),
            filename: item.name.clone(),
        };
        Ok(self.fetch(&job).await?.filename)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Idle,
    Draining,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub name: String,
    pub error: String,
}

/// Progress of the current (or last) run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub status: QueueStatus,
    pub total: usize,
    pub pending: usize,
    pub succeeded: Vec<String>,
    pub failures: Vec<ItemFailure>,
    pub current: Option<String>,
}

impl QueueSnapshot {
    /// Items that reached a terminal state.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.succeeded.len() + self.failures.len()
    }
}

#[derive(Debug)]
struct QueueState {
    status: QueueStatus,
    items: VecDeque<QueueItem>,
    total: usize,
    succeeded: Vec<String>,
    failures: Vec<ItemFailure>,
    current: Option<String>,
}

impl QueueState {
    fn idle() -> Self {
        Self {
            status: QueueStatus::Idle,
            items: VecDeque::new(),
            total: 0,
            succeeded: Vec::new(),
            failures: Vec::new(),
            current: None,
        }
    }

    fn draining(items: Vec<QueueItem>) -> Self {
        Self {
            status: QueueStatus::Draining,
            total: items.len(),
            items: items.into(),
            ..Self::idle()
        }
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            status: self.status,
            total: self.total,
            pending: self.items.len(),
            succeeded: self.succeeded.clone(),
            failures: self.failures.clone(),
            current: self.current.clone(),
        }
    }
}

/// Owns the queue and drives runs against a [`DownloadSink`].
pub struct QueueDriver<S> {
    sink: Arc<S>,
    item_delay: Duration,
    state: Arc<Mutex<QueueState>>,
}

impl<S> Clone for QueueDriver<S> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            item_delay: self.item_delay,
            state: Arc::clone(&self.state),
        }
    }
}

impl<S> std::fmt::Debug for QueueDriver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueDriver")
            .field("item_delay", &self.item_delay)
            .finish_non_exhaustive()
    }
}

impl<S: DownloadSink + 'static> QueueDriver<S> {
    #[must_use]
    pub fn new(sink: Arc<S>, item_delay: Duration) -> Self {
        Self {
            sink,
            item_delay,
            state: Arc::new(Mutex::new(QueueState::idle())),
        }
    }

    /// Replace the queue with `items` and start draining it.
    ///
    /// The returned handle resolves to the final snapshot of the run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueBusy`] while a previous run is still draining.
    pub async fn enqueue_all(&self, items: Vec<QueueItem>) -> Result<JoinHandle<QueueSnapshot>> {
        {
            let mut state = self.state.lock().await;
            if state.status == QueueStatus::Draining {
                return Err(Error::QueueBusy);
            }
            info!(items = items.len(), "Starting download run");
            *state = QueueState::draining(items);
        }

        let driver = self.clone();
        Ok(tokio::spawn(async move { driver.drain().await }))
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.state.lock().await.snapshot()
    }

    async fn drain(&self) -> QueueSnapshot {
        loop {
            let (item, position, total) = {
                let mut state = self.state.lock().await;
                let Some(item) = state.items.pop_front() else {
                    state.status = QueueStatus::Done;
                    state.current = None;
                    info!(
                        succeeded = state.succeeded.len(),
                        failed = state.failures.len(),
                        "Download run complete"
                    );
                    return state.snapshot();
                };
                state.current = Some(item.name.clone());
                (item, state.total - state.items.len(), state.total)
            };

            info!(name = %item.name, position, total, "Downloading queued item");
            let outcome = AssertUnwindSafe(self.sink.download(&item))
                .catch_unwind()
                .await;

            {
                let mut state = self.state.lock().await;
                state.current = None;
                let message = match outcome {
                    Ok(Ok(stored)) => {
                        state.succeeded.push(stored);
                        None
                    }
                    Ok(Err(e)) => {
                        warn!(name = %item.name, error = %e, "Queued download failed");
                        Some(e.to_string())
                    }
                    Err(_) => {
                        error!(name = %item.name, "Queued download panicked");
                        Some("download panicked".to_string())
                    }
                };
                if let Some(error) = message {
                    state.failures.push(ItemFailure {
                        name: item.name.clone(),
                        error,
                    });
                }
            }

            tokio::time::sleep(self.item_delay).await;
        }
    }
}

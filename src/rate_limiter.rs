//! Start-spacing rate limiter for outbound calls.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Gate for one class of outbound calls.
///
/// At most `max_concurrent` scheduled operations run at once, and consecutive
/// operations *start* at least `min_interval` apart no matter how quickly each
/// one finishes. Waiters are admitted in submission order: both the semaphore
/// and the mutex below are fair.
#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    min_interval: Duration,
    slots: Semaphore,
    /// Earliest instant the next operation may start. `None` until the first
    /// operation has started.
    next_start: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// `max_concurrent` is clamped to what a semaphore can hold.
    #[must_use]
    pub fn new(name: &'static str, max_concurrent: usize, min_interval: Duration) -> Self {
        Self {
            name,
            min_interval,
            slots: Semaphore::new(max_concurrent.clamp(1, Semaphore::MAX_PERMITS)),
            next_start: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Run `task` once a slot is free and the spacing interval has elapsed.
    ///
    /// The task's output, including any error, is returned unchanged. A
    /// submitted task cannot be cancelled by the limiter.
    pub async fn schedule<F, Fut, T>(&self, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self
            .slots
            .acquire()
            .await
            .expect("rate limiter semaphore is never closed");

        self.wait_for_turn().await;
        task().await
    }

    async fn wait_for_turn(&self) {
        let mut next_start = self.next_start.lock().await;

        if let Some(at) = *next_start {
            let now = Instant::now();
            if at > now {
                debug!(
                    limiter = self.name,
                    delay_ms = (at - now).as_millis(),
                    "waiting for rate limit slot"
                );
                sleep_until(at).await;
            }
        }

        *next_start = Some(Instant::now() + self.min_interval);
    }
}

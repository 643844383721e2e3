//! Per-filename locks for the download directory.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Serializes work on the same stored filename within one process.
///
/// Two requests for the same name wait for each other; requests for
/// different names do not interact.
#[derive(Debug, Default)]
pub struct FilenameLocks {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl FilenameLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other holder is working on `filename`.
    ///
    /// The lock is released when the returned guard is dropped.
    pub async fn acquire(&self, filename: &str) -> FilenameGuard<'_> {
        let lock = self.get_or_create(filename).await;
        let guard = lock.lock_owned().await;

        FilenameGuard {
            owner: self,
            filename: filename.to_string(),
            guard: Some(guard),
        }
    }

    async fn get_or_create(&self, filename: &str) -> Arc<Mutex<()>> {
        // Fast path: lock already exists
        {
            let read_guard = self.locks.read().await;
            if let Some(lock) = read_guard.get(filename) {
                return Arc::clone(lock);
            }
        }

        let mut write_guard = self.locks.write().await;
        // Another task may have inserted it while we waited for the write lock
        if let Some(lock) = write_guard.get(filename) {
            return Arc::clone(lock);
        }

        // Release-time pruning is best effort; collect whatever it missed
        write_guard.retain(|_, lock| Arc::strong_count(lock) > 1);

        let lock = Arc::new(Mutex::new(()));
        write_guard.insert(filename.to_string(), Arc::clone(&lock));
        lock
    }

    /// Drop the entry for `filename` if nobody else holds or awaits it.
    ///
    /// Skipped when the map is busy. The next insertion sweeps such entries.
    fn prune(&self, filename: &str) {
        if let Ok(mut write_guard) = self.locks.try_write() {
            if write_guard
                .get(filename)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                write_guard.remove(filename);
            }
        }
    }

    /// Number of filenames currently tracked.
    pub async fn len(&self) -> usize {
        self.locks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Exclusive hold on one filename.
#[derive(Debug)]
pub struct FilenameGuard<'a> {
    owner: &'a FilenameLocks,
    filename: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FilenameGuard<'_> {
    fn drop(&mut self) {
        // Release the mutex (and its Arc) before checking whether the entry
        // is still referenced.
        self.guard.take();
        self.owner.prune(&self.filename);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_name_is_exclusive() {
        let locks = FilenameLocks::new();
        let guard = locks.acquire("a.pdf").await;

        let second = tokio::time::timeout(Duration::from_millis(50), locks.acquire("a.pdf")).await;
        assert!(second.is_err());

        drop(guard);
        let _again = locks.acquire("a.pdf").await;
    }

    #[tokio::test]
    async fn test_different_names_do_not_block() {
        let locks = FilenameLocks::new();
        let _a = locks.acquire("a.pdf").await;
        let _b = locks.acquire("b.pdf").await;
        assert_eq!(locks.len().await, 2);
    }

    #[tokio::test]
    async fn test_entries_are_pruned_on_release() {
        let locks = FilenameLocks::new();
        {
            let _guard = locks.acquire("a.pdf").await;
            assert_eq!(locks.len().await, 1);
        }
        assert!(locks.is_empty().await);
    }

    #[tokio::test]
    async fn test_contended_release_is_swept_later() {
        let locks = FilenameLocks::new();
        let guard = locks.acquire("a.pdf").await;

        // A reader on the map makes the release-time prune give up
        let reader = locks.locks.read().await;
        drop(guard);
        drop(reader);
        assert_eq!(locks.len().await, 1);

        let _b = locks.acquire("b.pdf").await;
        let names: Vec<String> = locks.locks.read().await.keys().cloned().collect();
        assert_eq!(names, ["b.pdf"]);
    }

    #[tokio::test]
    async fn test_waiter_keeps_entry_alive() {
        let locks = Arc::new(FilenameLocks::new());
        let first = locks.acquire("a.pdf").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire("a.pdf").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(first);
        waiter.await.unwrap();
        assert!(locks.is_empty().await);
    }
}

//! Per-path mutual exclusion
//!
//! One async mutex per normalized path, created lazily on first use and kept
//! for the life of the registry. Waiters suspend until the current holder
//! drops its [`FileLock`]. No FIFO fairness across waiters is promised.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Held lock for one path. Released on drop or via [`FileLock::release`].
pub struct FileLock {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl FileLock {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn release(self) {}
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLock").field("key", &self.key).finish()
    }
}

#[derive(Default)]
pub struct FileLocker {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl FileLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical lock key for a path
    pub fn key_for(path: &Path) -> String {
        crate::resolver::normalize_path(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Suspend until the lock for `key` is free, then take it
    pub async fn get_lock(&self, key: &str) -> FileLock {
        let slot = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        let guard = slot.lock_owned().await;
        FileLock {
            key: key.to_string(),
            _guard: guard,
        }
    }

    pub async fn get_path_lock(&self, path: &Path) -> FileLock {
        self.get_lock(&Self::key_for(path)).await
    }

    /// Whether `key` is currently held
    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .lock()
            .get(key)
            .map(|slot| slot.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of paths that have ever been locked
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_release_frees_lock() {
        let locker = FileLocker::new();
        let lock = locker.get_lock("/repo/a.js").await;
        assert!(locker.is_locked("/repo/a.js"));
        assert_eq!(lock.key(), "/repo/a.js");
        lock.release();
        assert!(!locker.is_locked("/repo/a.js"));
        assert_eq!(locker.len(), 1);
    }

    #[tokio::test]
    async fn test_waiter_suspends_until_release() {
        let locker = Arc::new(FileLocker::new());
        let held = locker.get_lock("/repo/a.js").await;

        let waiter = {
            let locker = Arc::clone(&locker);
            tokio::spawn(async move {
                let _lock = locker.get_lock("/repo/a.js").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_distinct_paths_do_not_contend() {
        let locker = FileLocker::new();
        let _a = locker.get_lock("/repo/a.js").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locker.get_lock("/repo/b.js")).await;
        assert!(b.is_ok());
    }

    #[test]
    fn test_key_is_normalized() {
        assert_eq!(
            FileLocker::key_for(Path::new("/repo/src/../a.js")),
            FileLocker::key_for(Path::new("/repo/./a.js"))
        );
    }
}

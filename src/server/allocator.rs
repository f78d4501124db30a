//! Sticky file-to-worker assignment

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{DispatchError, Result};
use crate::resolver::normalize_path;
use crate::worker::WorkerHandle;

#[async_trait]
pub trait FileAllocator: Send + Sync {
    /// Owner of `path`, assigning one on first request. Once assigned, the
    /// same path always yields the same worker.
    async fn get_or_assign_owner(&self, path: &Path) -> Result<WorkerHandle>;
}

/// Round-robin first assignment over a fixed pool, sticky afterwards
pub struct StickyAllocator {
    workers: Vec<WorkerHandle>,
    owners: Mutex<HashMap<PathBuf, usize>>,
    next: AtomicUsize,
}

impl StickyAllocator {
    pub fn new(workers: Vec<WorkerHandle>) -> Self {
        Self {
            workers,
            owners: Mutex::new(HashMap::new()),
            next: AtomicUsize::new(0),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Currently assigned owner, if any
    pub fn owner_of(&self, path: &Path) -> Option<usize> {
        self.owners
            .lock()
            .get(&normalize_path(path))
            .map(|&index| self.workers[index].id)
    }
}

#[async_trait]
impl FileAllocator for StickyAllocator {
    async fn get_or_assign_owner(&self, path: &Path) -> Result<WorkerHandle> {
        if self.workers.is_empty() {
            return Err(DispatchError::internal(format!(
                "no workers available to own {}",
                path.display()
            )));
        }

        let mut owners = self.owners.lock();
        let index = *owners.entry(normalize_path(path)).or_insert_with(|| {
            let index = self.next.fetch_add(1, Ordering::SeqCst) % self.workers.len();
            tracing::debug!(
                "[StickyAllocator] Assigned {} to worker {}",
                path.display(),
                self.workers[index].id
            );
            index
        });
        Ok(self.workers[index].clone())
    }
}

//! Change aggregation for watch mode
//!
//! `watch_files_from_args` resolves the arguments once, delivers the initial
//! file set, then listens to the server's refresh events. Changed paths under
//! any resolved argument accumulate in a pending set and are flushed to the
//! callback after the debounce interval. While a callback is running, new
//! changes keep accumulating and are flushed as soon as it returns, so at
//! most one callback runs at a time.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::project::ProjectManager;

use super::{GetFilesOptions, GetFilesResult, ServerRequest, Subscription};

type WatchCallback = Box<dyn Fn(GetFilesResult, bool) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Default)]
struct Pending {
    changes: GetFilesResult,
    running: bool,
    timer: Option<JoinHandle<()>>,
}

struct Aggregator {
    roots: Vec<PathBuf>,
    extensions: Vec<String>,
    debounce: Duration,
    projects: Arc<dyn ProjectManager>,
    callback: WatchCallback,
    pending: Mutex<Pending>,
    unsubscribed: AtomicBool,
}

impl Aggregator {
    /// A change counts when it lies under one of the resolved arguments. The
    /// `--ext` filter applies too, so a watch never reports a file its
    /// initial listing would have skipped.
    fn accepts(&self, path: &Path) -> bool {
        if !self.roots.iter().any(|root| path.starts_with(root)) {
            return false;
        }
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    fn on_change(self: &Arc<Self>, path: PathBuf) {
        if !self.accepts(&path) {
            return;
        }

        let project = self.projects.find_project_existing(&path);
        let mut pending = self.pending.lock();
        if self.unsubscribed.load(Ordering::SeqCst) {
            return;
        }

        tracing::trace!("[Watch] Queued change {}", path.display());
        pending.changes.paths.insert(path);
        if let Some(project) = project {
            pending.changes.add_project(project);
        }

        if !pending.running && pending.timer.is_none() {
            let this = Arc::clone(self);
            pending.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(this.debounce).await;
                this.flush(false).await;
            }));
        }
    }

    /// Deliver pending changes until none are left. The initial flush fires
    /// even when the set is empty.
    async fn flush(self: &Arc<Self>, mut initial: bool) {
        loop {
            let batch = {
                let mut pending = self.pending.lock();
                pending.timer = None;
                if self.unsubscribed.load(Ordering::SeqCst)
                    || (!initial && pending.changes.is_empty())
                {
                    pending.running = false;
                    return;
                }
                pending.running = true;
                std::mem::take(&mut pending.changes)
            };

            tracing::debug!(
                "[Watch] Flushing {} changed files (initial: {})",
                batch.len(),
                initial
            );
            if let Err(e) = (self.callback)(batch, initial).await {
                tracing::error!("[Watch] Change callback failed: {}", e);
            }
            initial = false;
        }
    }

    async fn listen(self: Arc<Self>, mut events: broadcast::Receiver<PathBuf>) {
        loop {
            match events.recv().await {
                Ok(path) => self.on_change(path),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("[Watch] Dropped {} refresh events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Handle for an active watch, cancelled when its request ends
pub struct WatchSubscription {
    aggregator: Arc<Aggregator>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl WatchSubscription {
    pub fn is_active(&self) -> bool {
        !self.aggregator.unsubscribed.load(Ordering::SeqCst)
    }
}

impl Subscription for WatchSubscription {
    fn unsubscribe(&self) {
        if self.aggregator.unsubscribed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(timer) = self.aggregator.pending.lock().timer.take() {
            timer.abort();
        }
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        tracing::debug!("[Watch] Unsubscribed");
    }
}

impl std::fmt::Debug for WatchSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSubscription")
            .field("roots", &self.aggregator.roots)
            .field("active", &self.is_active())
            .finish()
    }
}

impl ServerRequest {
    /// Resolve `opts` to a file set, deliver it, then deliver debounced
    /// batches of changes under the resolved arguments until the request ends
    ///
    /// The callback's second argument is `true` only for the initial set.
    pub async fn watch_files_from_args<F, Fut>(
        &self,
        opts: GetFilesOptions,
        callback: F,
    ) -> Result<Arc<WatchSubscription>>
    where
        F: Fn(GetFilesResult, bool) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (resolved_args, _) = self
            .resolve_files_from_args(opts.args.as_deref(), opts.try_alternate_arg.as_ref())
            .await?;
        let initial = self.get_files_from_args(&opts).await?;

        let server = self.server();
        let aggregator = Arc::new(Aggregator {
            roots: resolved_args.into_iter().map(|arg| arg.path).collect(),
            extensions: opts.glob.extensions.clone(),
            debounce: server.config().debounce,
            projects: Arc::clone(server.projects()),
            callback: Box::new(
                move |result: GetFilesResult, initial: bool| -> BoxFuture<'static, Result<()>> {
                    Box::pin(callback(result, initial))
                },
            ),
            pending: Mutex::new(Pending {
                changes: initial,
                running: true,
                timer: None,
            }),
            unsubscribed: AtomicBool::new(false),
        });

        let listener = tokio::spawn(Arc::clone(&aggregator).listen(server.subscribe_refresh()));
        let subscription = Arc::new(WatchSubscription {
            aggregator: Arc::clone(&aggregator),
            listener: Mutex::new(Some(listener)),
        });
        self.register_subscription(subscription.clone());

        tracing::info!(
            "[Watch] Request {} watching {} roots",
            self.id,
            aggregator.roots.len()
        );
        aggregator.flush(true).await;
        Ok(subscription)
    }
}

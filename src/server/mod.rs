//! Request coordinator
//!
//! The [`Server`] owns everything requests share: configuration, the per-file
//! lock registry, the result cache, the collaborators (worker allocator,
//! file system, resolver, project manager), the refresh channel feeding
//! watch mode, and the set of in-flight requests.
//!
//! # Architecture
//!
//! ```text
//! client query ──► Server::handle_query ──► ServerRequest ──► ServerCommand
//!                                               │
//!                    ┌──────────────────────────┼─────────────────────┐
//!                    ▼                          ▼                     ▼
//!              FileLocker              FileAllocator ─► worker   ResultCache
//!
//! FileWatcher / buffer updates ──► refresh channel ──► watch aggregators
//! ```
//!
//! # Modules
//!
//! - `allocator` - file to worker ownership
//! - `cache` - per-file result cache
//! - `client` - connected clients and their reporters
//! - `locker` - per-path async locks
//! - `watcher` - OS file watching into the refresh channel

pub mod allocator;
pub mod cache;
pub mod client;
pub mod locker;
pub mod watcher;

pub use allocator::{FileAllocator, StickyAllocator};
pub use cache::{CacheEntry, ResultCache, ResultCacheStats};
pub use client::{ClientFlags, Reporter, ServerClient, TracingReporter};
pub use locker::{FileLock, FileLocker};
pub use watcher::{FileWatcher, WatcherConfig, WatcherHandle};

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::diagnostics::{derive_diagnostic_from_error, DiagnosticCategory};
use crate::error::{DispatchError, Result};
use crate::fs::FileSystem;
use crate::project::ProjectManager;
use crate::request::{
    FlagError, NormalizedCommandFlags, SerializeTarget, ServerQuery, ServerQueryResponse, ServerRequest,
};
use crate::resolver::Resolver;

/// Server-wide settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Program name used when serializing command lines for diagnostics
    pub program_name: String,
    /// Watch mode debounce
    pub debounce: Duration,
    /// How many times an operation is re-run because its file changed
    pub max_mtime_retries: usize,
    pub refresh_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            program_name: "dispatch".to_string(),
            debounce: Duration::from_millis(100),
            max_mtime_retries: 25,
            refresh_channel_capacity: 1024,
        }
    }
}

/// External services the server coordinates
#[derive(Clone)]
pub struct Collaborators {
    pub allocator: Arc<dyn FileAllocator>,
    pub fs: Arc<dyn FileSystem>,
    pub resolver: Arc<dyn Resolver>,
    pub projects: Arc<dyn ProjectManager>,
}

/// A named client command
#[async_trait]
pub trait ServerCommand: Send + Sync {
    /// Flag values the command assumes when the client omits them
    fn default_flags(&self) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    async fn call(&self, request: &Arc<ServerRequest>) -> Result<Option<Value>>;
}

pub struct Server {
    config: ServerConfig,
    file_locker: FileLocker,
    cache: ResultCache,
    collaborators: Collaborators,
    refresh_tx: broadcast::Sender<PathBuf>,
    commands: RwLock<HashMap<String, Arc<dyn ServerCommand>>>,
    next_request_id: AtomicU64,
    requests_in_flight: Mutex<HashMap<u64, Arc<ServerRequest>>>,
}

impl Server {
    pub fn new(config: ServerConfig, collaborators: Collaborators) -> Arc<Self> {
        let (refresh_tx, _) = broadcast::channel(config.refresh_channel_capacity.max(1));
        Arc::new(Self {
            config,
            file_locker: FileLocker::new(),
            cache: ResultCache::new(),
            collaborators,
            refresh_tx,
            commands: RwLock::new(HashMap::new()),
            next_request_id: AtomicU64::new(0),
            requests_in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn file_locker(&self) -> &FileLocker {
        &self.file_locker
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn allocator(&self) -> &Arc<dyn FileAllocator> {
        &self.collaborators.allocator
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.collaborators.fs
    }

    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.collaborators.resolver
    }

    pub fn projects(&self) -> &Arc<dyn ProjectManager> {
        &self.collaborators.projects
    }

    pub fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    // ========================================================================
    // Refresh events
    // ========================================================================

    /// Announce that `path` changed on disk or in a buffer
    pub fn refresh_file(&self, path: &Path) {
        // No receivers is fine: nobody is watching
        let receivers = self.refresh_tx.send(path.to_path_buf()).unwrap_or(0);
        tracing::trace!("[Server] Refresh {} ({} watchers)", path.display(), receivers);
    }

    pub fn subscribe_refresh(&self) -> broadcast::Receiver<PathBuf> {
        self.refresh_tx.subscribe()
    }

    // ========================================================================
    // Commands and requests
    // ========================================================================

    pub fn register_command(&self, name: impl Into<String>, command: Arc<dyn ServerCommand>) {
        let name = name.into();
        tracing::debug!("[Server] Registered command {}", name);
        self.commands.write().insert(name, command);
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.commands.read().contains_key(name)
    }

    /// Run one client query to completion and return its response
    pub async fn handle_query(
        self: &Arc<Self>,
        client: Arc<ServerClient>,
        query: ServerQuery,
    ) -> ServerQueryResponse {
        let request = ServerRequest::new(Arc::clone(self), client, query);
        request.init();

        let command_name = request.query().command_name.clone();
        let command = self.commands.read().get(&command_name).cloned();

        let res = match command {
            None => {
                let mut error = FlagError::new(
                    format!("Unknown command {:?}", command_name),
                    SerializeTarget::None,
                );
                error.category = Some(DiagnosticCategory::FlagsInvalid);
                Self::error_response(request.diagnostic_flag_error(error))
            }
            Some(command) => {
                let default_flags = command.default_flags();
                let mut flags = default_flags.clone();
                flags.extend(request.query().command_flags.clone());
                request.set_normalized_command_flags(NormalizedCommandFlags {
                    flags,
                    default_flags,
                });

                match command.call(&request).await {
                    Ok(data) => ServerQueryResponse::success(data),
                    Err(err) => Self::error_response(err),
                }
            }
        };

        // A cancelled request already produced its response
        request
            .teardown(Some(res))
            .or_else(|| request.final_response())
            .unwrap_or(ServerQueryResponse::Cancelled)
    }

    fn error_response(err: DispatchError) -> ServerQueryResponse {
        match err {
            DispatchError::Cancelled => ServerQueryResponse::Cancelled,
            DispatchError::InvalidRequest {
                diagnostics,
                show_help,
                ..
            } => ServerQueryResponse::InvalidRequest {
                diagnostics,
                show_help,
            },
            DispatchError::Diagnostics(err) => ServerQueryResponse::diagnostics(err.diagnostics),
            other => {
                tracing::error!("[Server] Request failed: {}", other);
                ServerQueryResponse::diagnostics(vec![derive_diagnostic_from_error(
                    &other,
                    DiagnosticCategory::InternalRequest,
                )])
            }
        }
    }

    /// Cancel every in-flight request of a disconnecting client
    pub fn cancel_client_requests(&self, client_id: u64) -> usize {
        let requests: Vec<Arc<ServerRequest>> = self
            .requests_in_flight
            .lock()
            .values()
            .filter(|request| request.client().id == client_id)
            .cloned()
            .collect();

        for request in &requests {
            request.cancel();
        }
        if !requests.is_empty() {
            tracing::info!(
                "[Server] Cancelled {} requests for client {}",
                requests.len(),
                client_id
            );
        }
        requests.len()
    }

    pub fn handle_request_start(&self, request: &Arc<ServerRequest>) {
        tracing::debug!(
            "[Server] Request {} started: {} {:?}",
            request.id,
            request.query().command_name,
            request.query().args
        );
        self.requests_in_flight
            .lock()
            .insert(request.id, Arc::clone(request));
    }

    pub fn handle_request_end(&self, request: &ServerRequest) {
        tracing::debug!("[Server] Request {} ended", request.id);
        self.requests_in_flight.lock().remove(&request.id);
    }

    pub fn requests_in_flight(&self) -> usize {
        self.requests_in_flight.lock().len()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("commands", &self.commands.read().keys().collect::<Vec<_>>())
            .field("requests_in_flight", &self.requests_in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{Diagnostic, DiagnosticLocation, DiagnosticsError};
    use crate::testing::TestServer;
    use tokio::sync::Notify;

    struct Echo;

    #[async_trait]
    impl ServerCommand for Echo {
        async fn call(&self, request: &Arc<ServerRequest>) -> Result<Option<Value>> {
            Ok(Some(Value::from(request.query().args.clone())))
        }
    }

    struct Failing(fn() -> DispatchError);

    #[async_trait]
    impl ServerCommand for Failing {
        async fn call(&self, _request: &Arc<ServerRequest>) -> Result<Option<Value>> {
            Err((self.0)())
        }
    }

    /// Blocks until notified, then hits a cancellation checkpoint
    struct Waiting(Arc<Notify>);

    #[async_trait]
    impl ServerCommand for Waiting {
        async fn call(&self, request: &Arc<ServerRequest>) -> Result<Option<Value>> {
            self.0.notified().await;
            request.check_cancelled()?;
            Ok(Some(Value::from("finished")))
        }
    }

    #[tokio::test]
    async fn test_success_response() {
        let t = TestServer::new();
        t.server.register_command("echo", Arc::new(Echo));

        let res = t
            .server
            .handle_query(t.client.clone(), ServerQuery::new("echo").with_args(["a"]))
            .await;
        assert_eq!(res, ServerQueryResponse::success(Some(serde_json::json!(["a"]))));
        assert_eq!(t.server.requests_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unknown_command_shows_help() {
        let t = TestServer::new();
        let res = t
            .server
            .handle_query(t.client.clone(), ServerQuery::new("nope"))
            .await;
        match res {
            ServerQueryResponse::InvalidRequest {
                diagnostics,
                show_help,
            } => {
                assert!(show_help);
                assert_eq!(diagnostics[0].description.message, "Unknown command \"nope\"");
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let t = TestServer::new();
        t.server.register_command(
            "diag",
            Arc::new(Failing(|| {
                DiagnosticsError::single(Diagnostic::new(
                    DiagnosticCategory::ArgsInvalid,
                    "nope",
                    DiagnosticLocation::default(),
                ))
                .into()
            })),
        );
        t.server
            .register_command("boom", Arc::new(Failing(|| DispatchError::worker("crashed"))));

        let res = t
            .server
            .handle_query(t.client.clone(), ServerQuery::new("diag"))
            .await;
        assert!(matches!(res, ServerQueryResponse::Diagnostics { has_diagnostics: true, .. }));

        let res = t
            .server
            .handle_query(t.client.clone(), ServerQuery::new("boom"))
            .await;
        match res {
            ServerQueryResponse::Diagnostics { diagnostics, .. } => {
                assert_eq!(diagnostics[0].category(), DiagnosticCategory::InternalRequest);
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_cancels_in_flight_requests() {
        let t = TestServer::new();
        let gate = Arc::new(Notify::new());
        t.server.register_command("wait", Arc::new(Waiting(gate.clone())));

        let server = t.server.clone();
        let client = t.client.clone();
        let handle = tokio::spawn(async move { server.handle_query(client, ServerQuery::new("wait")).await });

        while t.server.requests_in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(t.server.cancel_client_requests(t.client.id), 1);
        assert_eq!(t.server.cancel_client_requests(t.client.id + 1), 0);
        gate.notify_one();

        assert_eq!(handle.await.unwrap(), ServerQueryResponse::Cancelled);
        assert_eq!(t.server.requests_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_refresh_without_watchers_is_fine() {
        let t = TestServer::new();
        t.server.refresh_file(Path::new("/repo/a.js"));

        let mut rx = t.server.subscribe_refresh();
        t.server.refresh_file(Path::new("/repo/b.js"));
        assert_eq!(rx.recv().await.unwrap(), PathBuf::from("/repo/b.js"));
    }
}

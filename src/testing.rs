//! In-crate fakes for the collaborator traits

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use crate::diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticLocation, DiagnosticsError};
use crate::error::{DispatchError, Result};
use crate::fs::{FileSystem, GlobOptions, MemoryFileSystem};
use crate::project::{FileReference, ProjectConfig, ProjectManager, ProjectRegistry};
use crate::request::{ServerQuery, ServerRequest};
use crate::resolver::{normalize_path, FsResolver, Resolver, ResolverQuery, ResolverResponse};
use crate::server::{ClientFlags, Collaborators, Server, ServerClient, ServerConfig, StickyAllocator, TracingReporter};
use crate::worker::{
    AnalyzeDependencyResult, AstRoot, CompileResult, CompilerOptions, FormatResult,
    InlineSnapshotUpdate, LintOptions, LintResult, ModuleSignature, ParseOptions, WorkerBridge, WorkerHandle,
};

// ============================================================================
// File system
// ============================================================================

/// Files that exist only in memory, with controllable mtimes. Ignore
/// patterns are not applied when globbing.
#[derive(Default)]
pub struct FakeFileSystem {
    files: Mutex<BTreeMap<PathBuf, SystemTime>>,
    buffers: Mutex<HashMap<PathBuf, String>>,
}

impl FakeFileSystem {
    pub fn add_file(&self, path: impl Into<PathBuf>) {
        self.files.lock().insert(path.into(), SystemTime::UNIX_EPOCH);
    }

    /// Bump the mtime of `path` by one second
    pub fn touch(&self, path: &Path) {
        if let Some(mtime) = self.files.lock().get_mut(path) {
            *mtime += Duration::from_secs(1);
        }
    }

    /// A known file, or a directory containing one
    pub fn exists(&self, path: &Path) -> bool {
        self.files.lock().keys().any(|file| file.starts_with(path))
    }
}

impl FileSystem for FakeFileSystem {
    fn maybe_get_mtime(&self, path: &Path) -> Option<SystemTime> {
        self.files.lock().get(path).copied()
    }

    fn glob(&self, root: &Path, options: &GlobOptions) -> BTreeSet<PathBuf> {
        self.files
            .lock()
            .keys()
            .filter(|file| file.starts_with(root) && options.accepts_extension(file))
            .cloned()
            .collect()
    }

    fn add_buffer(&self, path: &Path, content: String) {
        self.buffers.lock().insert(path.to_path_buf(), content);
    }

    fn clear_buffer(&self, path: &Path) {
        self.buffers.lock().remove(path);
    }

    fn buffer(&self, path: &Path) -> Option<String> {
        self.buffers.lock().get(path).cloned()
    }
}

pub struct FakeResolver {
    fs: Arc<FakeFileSystem>,
}

#[async_trait]
impl Resolver for FakeResolver {
    async fn resolve_entry(&self, query: &ResolverQuery) -> ResolverResponse {
        let path = normalize_path(&query.origin.join(&query.source));
        if self.fs.exists(&path) {
            ResolverResponse::Found { path }
        } else {
            ResolverResponse::Missing
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

pub enum FailMode {
    /// Unstructured error
    Plain(String),
    /// A structured `args/invalid` diagnostic
    Diagnostics,
}

type CallHook = Arc<dyn Fn(&FileReference, usize) + Send + Sync>;

/// Worker that records calls and returns canned results derived from the
/// file and per-operation call index
#[derive(Default)]
pub struct FakeWorker {
    calls: Mutex<HashMap<&'static str, usize>>,
    delay: Mutex<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    failure: Mutex<Option<FailMode>>,
    hook: Mutex<Option<CallHook>>,
}

impl FakeWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn fail_with(&self, mode: FailMode) {
        *self.failure.lock() = Some(mode);
    }

    /// Run `hook` inside every call, with the call's index for its operation
    pub fn on_call(&self, hook: impl Fn(&FileReference, usize) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Arc::new(hook));
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls.lock().get(op).copied().unwrap_or(0)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn enter(&self, op: &'static str, file: &FileReference) -> Result<usize> {
        let call = {
            let mut calls = self.calls.lock();
            let count = calls.entry(op).or_insert(0);
            *count += 1;
            *count - 1
        };

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let hook = self.hook.lock().clone();
        if let Some(hook) = hook {
            hook(file, call);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        match &*self.failure.lock() {
            Some(FailMode::Plain(message)) => Err(DispatchError::worker(message.clone())),
            Some(FailMode::Diagnostics) => Err(DiagnosticsError::single(Diagnostic::new(
                DiagnosticCategory::ArgsInvalid,
                "worker rejected file",
                DiagnosticLocation::file(file.uid.clone()),
            ))
            .into()),
            None => Ok(call),
        }
    }
}

#[async_trait]
impl WorkerBridge for FakeWorker {
    async fn parse(&self, file: &FileReference, _options: &ParseOptions) -> Result<AstRoot> {
        self.enter("parse", file).await?;
        Ok(json!({ "type": "Program", "file": file.relative }))
    }

    async fn format(
        &self,
        file: &FileReference,
        _parse_options: &ParseOptions,
    ) -> Result<Option<FormatResult>> {
        self.enter("format", file).await?;
        Ok(Some(FormatResult {
            original: format!("// {}", file.relative),
            formatted: format!("// {}\n", file.relative),
        }))
    }

    async fn lint(
        &self,
        file: &FileReference,
        _options: &LintOptions,
        _parse_options: &ParseOptions,
    ) -> Result<LintResult> {
        let call = self.enter("lint", file).await?;
        Ok(LintResult {
            diagnostics: vec![],
            save: Some(format!("{}#{}", file.relative, call)),
        })
    }

    async fn compile(
        &self,
        file: &FileReference,
        stage: &str,
        _options: &CompilerOptions,
        _parse_options: &ParseOptions,
    ) -> Result<CompileResult> {
        self.enter("compile", file).await?;
        Ok(CompileResult {
            code: format!("/* {} */ {}", stage, file.relative),
            cache_dependencies: vec![file.real.with_file_name("dep.js").display().to_string()],
            diagnostics: vec![],
            cached: false,
        })
    }

    async fn analyze_dependencies(
        &self,
        file: &FileReference,
        _parse_options: &ParseOptions,
    ) -> Result<AnalyzeDependencyResult> {
        self.enter("analyzeDependencies", file).await?;
        Ok(AnalyzeDependencyResult {
            dependencies: vec!["./dep".to_string()],
            cached: false,
        })
    }

    async fn module_signature(
        &self,
        file: &FileReference,
        _parse_options: &ParseOptions,
    ) -> Result<ModuleSignature> {
        self.enter("moduleSignature", file).await?;
        Ok(ModuleSignature {
            filename: file.uid.clone(),
            exports: vec![json!("default")],
        })
    }

    async fn update_inline_snapshots(
        &self,
        file: &FileReference,
        updates: &[InlineSnapshotUpdate],
        _parse_options: &ParseOptions,
    ) -> Result<Vec<Diagnostic>> {
        self.enter("updateInlineSnapshots", file).await?;
        // Empty snapshots stand in for call sites the worker could not find
        Ok(updates
            .iter()
            .filter(|update| update.snapshot.is_empty())
            .map(|update| {
                Diagnostic::new(
                    DiagnosticCategory::ArgsInvalid,
                    format!("no snapshot call at {}:{}", update.line, update.column),
                    DiagnosticLocation::file(file.uid.clone()),
                )
            })
            .collect())
    }

    async fn update_buffer(&self, file: &FileReference, _content: &str) -> Result<()> {
        self.enter("updateBuffer", file).await?;
        Ok(())
    }

    async fn clear_buffer(&self, file: &FileReference) -> Result<()> {
        self.enter("clearBuffer", file).await?;
        Ok(())
    }
}

// ============================================================================
// Server
// ============================================================================

/// A server wired to fakes, plus handles to inspect them
pub struct TestServer {
    pub server: Arc<Server>,
    pub client: Arc<ServerClient>,
    pub reporter: Arc<TracingReporter>,
    pub worker: Arc<FakeWorker>,
    pub projects: Arc<ProjectRegistry>,
    fake_fs: Option<Arc<FakeFileSystem>>,
}

impl TestServer {
    /// In-memory project at `/repo`, which is also the client cwd
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let fs = Arc::new(FakeFileSystem::default());
        let resolver = Arc::new(FakeResolver { fs: Arc::clone(&fs) });
        let mut t = Self::build(config, Path::new("/repo"), ProjectConfig::default(), fs.clone(), resolver);
        t.fake_fs = Some(fs);
        t
    }

    /// On-disk project at `root`, which is also the client cwd
    pub fn with_project(root: &Path, project_config: ProjectConfig) -> Self {
        Self::build(
            ServerConfig::default(),
            root,
            project_config,
            Arc::new(MemoryFileSystem::new()),
            Arc::new(FsResolver::new()),
        )
    }

    fn build(
        config: ServerConfig,
        root: &Path,
        project_config: ProjectConfig,
        fs: Arc<dyn FileSystem>,
        resolver: Arc<dyn Resolver>,
    ) -> Self {
        let worker = Arc::new(FakeWorker::new());
        let projects = Arc::new(ProjectRegistry::new());
        projects.add_project(root.to_path_buf(), project_config);

        let server = Server::new(
            config,
            Collaborators {
                allocator: Arc::new(StickyAllocator::new(vec![WorkerHandle::new(0, worker.clone())])),
                fs,
                resolver,
                projects: projects.clone() as Arc<dyn ProjectManager>,
            },
        );
        let reporter = Arc::new(TracingReporter::new());
        let client = Arc::new(ServerClient::new(1, ClientFlags::new(root), reporter.clone()));

        Self {
            server,
            client,
            reporter,
            worker,
            projects,
            fake_fs: None,
        }
    }

    pub fn fake_fs(&self) -> Arc<FakeFileSystem> {
        self.fake_fs
            .clone()
            .expect("TestServer::with_project uses the real file system")
    }

    pub fn request(&self, query: ServerQuery) -> Arc<ServerRequest> {
        ServerRequest::new(self.server.clone(), self.client.clone(), query)
    }
}

//! File operation dispatch
//!
//! Every worker call for a file goes through
//! [`ServerRequest::wrap_request_diagnostic`]:
//!
//! 1. resolve (or assign) the owning worker
//! 2. snapshot the file's mtime
//! 3. take the per-path lock
//! 4. run the operation between a start and end marker
//! 5. classify failures into diagnostics
//! 6. release the lock and re-read the mtime; if it moved, throw the result
//!    away and run the whole thing again
//!
//! The lock keeps two operations on one file from overlapping. It cannot stop
//! an editor from writing the file mid-operation, so the mtime comparison
//! catches that and retries until a run sees a stable file. Retries are
//! capped by `ServerConfig::max_mtime_retries`, and a cancelled request stops
//! before the next attempt.
//!
//! Paths are normalized first so the owner, lock and cache entry of a file
//! never depend on how the caller spelled it.
//!
//! The `request_worker_*` wrappers add cancellation checkpoints and, for
//! lint, compile, dependency analysis and module signatures, the result
//! cache.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::diagnostics::{
    derive_diagnostic_from_error, Diagnostic, DiagnosticAdvice, DiagnosticCategory, DiagnosticLocation,
    DiagnosticsError,
};
use crate::error::{DispatchError, Result};
use crate::project::FileReference;
use crate::resolver::normalize_path;
use crate::server::cache::{compile_key, fingerprint};
use crate::worker::{
    AnalyzeDependencyResult, AstRoot, CompileResult, CompilerOptions, FormatResult,
    InlineSnapshotUpdate, LintOptions, LintResult, ModuleSignature, ParseOptions, WorkerBridge,
};

use super::ServerRequest;

fn operation_advice(method: &str, file: &FileReference) -> DiagnosticAdvice {
    DiagnosticAdvice::info(format!(
        "Error occurred while requesting {} for {}",
        method, file.uid
    ))
}

/// Structured errors and cancellation pass through untouched; anything else
/// becomes an internal-error diagnostic naming the operation and file.
fn classify_failure(err: DispatchError, method: &str, file: &FileReference) -> DispatchError {
    if err.diagnostics().is_some() || err.is_cancelled() {
        return err;
    }

    tracing::warn!("[Dispatcher] {} failed for {}: {}", method, file.uid, err);
    let mut diag = derive_diagnostic_from_error(&err, DiagnosticCategory::InternalRequest)
        .with_advice([operation_advice(method, file)]);
    if diag.location == DiagnosticLocation::default() {
        diag.location = DiagnosticLocation::file(file.uid.clone());
    }
    DiagnosticsError::single(diag).into()
}

impl ServerRequest {
    /// Run `factory` against the owner of `path` under the path's lock,
    /// retrying when the file changed underneath it
    pub async fn wrap_request_diagnostic<T, F, Fut>(
        &self,
        method: &str,
        path: &Path,
        factory: F,
    ) -> Result<T>
    where
        F: Fn(Arc<dyn WorkerBridge>, FileReference) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let path = normalize_path(path);
        let path = path.as_path();
        let server = self.server();
        let max_retries = server.config().max_mtime_retries;
        let mut retries = 0usize;

        loop {
            self.check_cancelled()?;

            let owner = server.allocator().get_or_assign_owner(path).await?;
            let start_mtime = server.fs().maybe_get_mtime(path);
            let lock = server.file_locker().get_path_lock(path).await;
            let file = server.projects().file_reference(path);

            let marker = self.start_marker(
                format!("{}: {}", method, file.relative),
                method,
                format!("worker {}", owner.id),
            );

            let outcome = match factory(Arc::clone(&owner.bridge), file.clone()).await {
                Ok(res) => {
                    self.end_marker(marker);
                    Ok(res)
                }
                Err(err) => Err(classify_failure(err, method, &file)),
            };

            lock.release();

            let end_mtime = server.fs().maybe_get_mtime(path);
            if end_mtime == start_mtime {
                return outcome;
            }

            retries += 1;
            if retries > max_retries {
                tracing::warn!(
                    "[Dispatcher] {} kept changing during {}, giving up after {} retries",
                    file.uid,
                    method,
                    max_retries
                );
                let diag = Diagnostic::new(
                    DiagnosticCategory::FileUnstable,
                    format!("{} changed during every attempt to {} it", file.relative, method),
                    DiagnosticLocation::file(file.uid.clone()),
                )
                .with_advice([operation_advice(method, &file)]);
                return Err(DiagnosticsError::single(diag).into());
            }

            tracing::debug!(
                "[Dispatcher] {} changed during {}, retrying (attempt {})",
                file.uid,
                method,
                retries + 1
            );
        }
    }

    pub async fn request_worker_update_buffer(&self, path: &Path, content: &str) -> Result<()> {
        self.check_cancelled()?;
        let path = normalize_path(path);
        let path = path.as_path();

        let server = self.server();
        self.wrap_request_diagnostic("updateBuffer", path, move |bridge, file| async move {
            bridge.update_buffer(&file, content).await?;
            server.fs().add_buffer(path, content.to_string());
            server.refresh_file(path);
            Ok::<_, DispatchError>(())
        })
        .await
    }

    pub async fn request_worker_clear_buffer(&self, path: &Path) -> Result<()> {
        self.check_cancelled()?;
        let path = normalize_path(path);
        let path = path.as_path();

        let server = self.server();
        self.wrap_request_diagnostic("clearBuffer", path, move |bridge, file| async move {
            bridge.clear_buffer(&file).await?;
            server.fs().clear_buffer(path);
            server.refresh_file(path);
            Ok::<_, DispatchError>(())
        })
        .await
    }

    pub async fn request_worker_parse(&self, path: &Path, options: &ParseOptions) -> Result<AstRoot> {
        self.check_cancelled()?;
        let path = normalize_path(path);
        let path = path.as_path();

        self.wrap_request_diagnostic("parse", path, move |bridge, file| async move {
            bridge.parse(&file, options).await
        })
        .await
    }

    pub async fn request_worker_format(
        &self,
        path: &Path,
        parse_options: &ParseOptions,
    ) -> Result<Option<FormatResult>> {
        self.check_cancelled()?;
        let path = normalize_path(path);
        let path = path.as_path();

        self.wrap_request_diagnostic("format", path, move |bridge, file| async move {
            bridge.format(&file, parse_options).await
        })
        .await
    }

    /// Uncached, like parse and format
    pub async fn request_worker_update_inline_snapshots(
        &self,
        path: &Path,
        updates: &[InlineSnapshotUpdate],
        parse_options: &ParseOptions,
    ) -> Result<Vec<Diagnostic>> {
        self.check_cancelled()?;
        let path = normalize_path(path);
        let path = path.as_path();

        self.wrap_request_diagnostic("updateInlineSnapshots", path, move |bridge, file| async move {
            bridge.update_inline_snapshots(&file, updates, parse_options).await
        })
        .await
    }

    pub async fn request_worker_lint(&self, path: &Path, options: &LintOptions) -> Result<LintResult> {
        self.check_cancelled()?;
        let path = normalize_path(path);
        let path = path.as_path();

        let cache = self.server().cache();
        let key = fingerprint(Some(options));
        if let Some(cached) = cache.lint(path, &key) {
            tracing::debug!("[Dispatcher] lint cache hit for {} ({})", path.display(), key);
            return Ok(cached);
        }

        let parse_options = &ParseOptions::new();
        let res = self
            .wrap_request_diagnostic("lint", path, move |bridge, file| async move {
                bridge.lint(&file, options, parse_options).await
            })
            .await?;

        cache.update(path, |entry| {
            entry.lint.insert(key, res.clone());
        });
        Ok(res)
    }

    /// Compile `path` for `stage`. Absent options share the cache slot of
    /// empty options.
    pub async fn request_worker_compile(
        &self,
        path: &Path,
        stage: &str,
        options: Option<&CompilerOptions>,
        parse_options: &ParseOptions,
    ) -> Result<CompileResult> {
        self.check_cancelled()?;
        let path = normalize_path(path);
        let path = path.as_path();

        let cache = self.server().cache();
        let key = compile_key(stage, options);
        if let Some(cached) = cache.compile(path, &key) {
            tracing::debug!("[Dispatcher] compile cache hit for {} ({})", path.display(), key);
            return Ok(cached);
        }

        let options = &options.cloned().unwrap_or_default();
        let res = self
            .wrap_request_diagnostic("compile", path, move |bridge, file| async move {
                bridge.compile(&file, stage, options, parse_options).await
            })
            .await?;

        let res = CompileResult {
            cached: false,
            ..self.normalize_compile_result(res)
        };

        cache.update(path, |entry| {
            entry.compile.insert(
                key,
                CompileResult {
                    cached: true,
                    ..res.clone()
                },
            );
        });
        Ok(res)
    }

    pub async fn request_worker_analyze_dependencies(
        &self,
        path: &Path,
        parse_options: &ParseOptions,
    ) -> Result<AnalyzeDependencyResult> {
        self.check_cancelled()?;
        let path = normalize_path(path);
        let path = path.as_path();

        let cache = self.server().cache();
        if let Some(cached) = cache.analyze_dependencies(path) {
            return Ok(cached);
        }

        let res = self
            .wrap_request_diagnostic("analyzeDependencies", path, move |bridge, file| async move {
                bridge.analyze_dependencies(&file, parse_options).await
            })
            .await?;

        cache.update(path, |entry| {
            entry.analyze_dependencies = Some(AnalyzeDependencyResult {
                cached: true,
                ..res.clone()
            });
        });
        Ok(AnalyzeDependencyResult {
            cached: false,
            ..res
        })
    }

    pub async fn request_worker_module_signature(
        &self,
        path: &Path,
        parse_options: &ParseOptions,
    ) -> Result<ModuleSignature> {
        self.check_cancelled()?;
        let path = normalize_path(path);
        let path = path.as_path();

        let cache = self.server().cache();
        if let Some(cached) = cache.module_signature(path) {
            return Ok(cached);
        }

        let res = self
            .wrap_request_diagnostic("moduleSignature", path, move |bridge, file| async move {
                bridge.module_signature(&file, parse_options).await
            })
            .await?;

        cache.update(path, |entry| {
            entry.module_signature = Some(res.clone());
        });
        Ok(res)
    }

    /// Replace raw dependency paths with stable file uids
    pub fn normalize_compile_result(&self, res: CompileResult) -> CompileResult {
        let projects = self.server().projects();
        CompileResult {
            cache_dependencies: res
                .cache_dependencies
                .iter()
                .map(|filename| projects.file_reference(&PathBuf::from(filename)).uid)
                .collect(),
            ..res
        }
    }
}

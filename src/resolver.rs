//! Argument path resolution
//!
//! Resolves a user-supplied path relative to an origin directory. Real
//! module resolution (package exports, platform suffixes, mocks) lives
//! elsewhere; [`FsResolver`] only understands plain file system paths.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticLocation, DiagnosticsError};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedType {
    File,
    /// A folder or a file
    Folder,
    Any,
}

#[derive(Debug, Clone)]
pub struct ResolverQuery {
    pub origin: PathBuf,
    pub source: PathBuf,
    pub requested_type: RequestedType,
}

impl ResolverQuery {
    pub fn new(origin: impl Into<PathBuf>, source: impl Into<PathBuf>, requested_type: RequestedType) -> Self {
        Self {
            origin: origin.into(),
            source: source.into(),
            requested_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverResponse {
    Found { path: PathBuf },
    Missing,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve_entry(&self, query: &ResolverQuery) -> ResolverResponse;

    /// Resolve or fail with a `resolver/notFound` diagnostic anchored at `location`
    async fn resolve_entry_assert(
        &self,
        query: &ResolverQuery,
        location: &DiagnosticLocation,
    ) -> Result<PathBuf> {
        match self.resolve_entry(query).await {
            ResolverResponse::Found { path } => Ok(path),
            ResolverResponse::Missing => Err(DiagnosticsError::single(Diagnostic::new(
                DiagnosticCategory::ResolverNotFound,
                format!(
                    "Failed to resolve {} from {}",
                    query.source.display(),
                    query.origin.display()
                ),
                location.clone(),
            ))
            .into()),
        }
    }
}

/// Plain file system resolver
#[derive(Debug, Default)]
pub struct FsResolver;

impl FsResolver {
    pub fn new() -> Self {
        Self
    }
}

/// Lexically collapse `.` and `..` without touching the disk
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[async_trait]
impl Resolver for FsResolver {
    async fn resolve_entry(&self, query: &ResolverQuery) -> ResolverResponse {
        let path = normalize_path(&query.origin.join(&query.source));

        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(_) => return ResolverResponse::Missing,
        };

        let accepted = match query.requested_type {
            RequestedType::File => meta.is_file(),
            RequestedType::Folder | RequestedType::Any => meta.is_file() || meta.is_dir(),
        };

        if accepted {
            ResolverResponse::Found { path }
        } else {
            ResolverResponse::Missing
        }
    }
}

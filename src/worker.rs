//! Worker bridge boundary
//!
//! Workers are external processes that do the actual parsing, linting and
//! compiling. The dispatch core only sees them through [`WorkerBridge`]; how
//! calls cross the process boundary is up to the implementor.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::diagnostics::Diagnostic;
use crate::error::Result;
use crate::project::FileReference;

/// Free-form option object passed through to a worker
///
/// Cached operations fingerprint this structurally, so two objects with the
/// same keys in a different insertion order land in different cache slots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationOptions(pub Map<String, Value>);

impl OperationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub type ParseOptions = OperationOptions;
pub type LintOptions = OperationOptions;
pub type CompilerOptions = OperationOptions;

/// Parsed program root as produced by a worker
pub type AstRoot = Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatResult {
    pub original: String,
    pub formatted: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LintResult {
    pub diagnostics: Vec<Diagnostic>,
    /// Fixed source when the linter applied autofixes
    pub save: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileResult {
    pub code: String,
    /// Files the output depends on. Raw paths from the worker, stable file
    /// uids once cached.
    pub cache_dependencies: Vec<String>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    #[serde(default)]
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeDependencyResult {
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub cached: bool,
}

/// Replacement for one inline snapshot, located by its call site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineSnapshotUpdate {
    pub line: usize,
    pub column: usize,
    pub snapshot: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSignature {
    pub filename: String,
    pub exports: Vec<Value>,
}

#[async_trait]
pub trait WorkerBridge: Send + Sync {
    async fn parse(&self, file: &FileReference, options: &ParseOptions) -> Result<AstRoot>;

    async fn format(
        &self,
        file: &FileReference,
        parse_options: &ParseOptions,
    ) -> Result<Option<FormatResult>>;

    async fn lint(
        &self,
        file: &FileReference,
        options: &LintOptions,
        parse_options: &ParseOptions,
    ) -> Result<LintResult>;

    async fn compile(
        &self,
        file: &FileReference,
        stage: &str,
        options: &CompilerOptions,
        parse_options: &ParseOptions,
    ) -> Result<CompileResult>;

    async fn analyze_dependencies(
        &self,
        file: &FileReference,
        parse_options: &ParseOptions,
    ) -> Result<AnalyzeDependencyResult>;

    async fn module_signature(
        &self,
        file: &FileReference,
        parse_options: &ParseOptions,
    ) -> Result<ModuleSignature>;

    /// Rewrite inline snapshots in the source of `file`
    async fn update_inline_snapshots(
        &self,
        file: &FileReference,
        updates: &[InlineSnapshotUpdate],
        parse_options: &ParseOptions,
    ) -> Result<Vec<Diagnostic>>;

    async fn update_buffer(&self, file: &FileReference, content: &str) -> Result<()>;

    async fn clear_buffer(&self, file: &FileReference) -> Result<()>;
}

/// A worker with a stable identity
#[derive(Clone)]
pub struct WorkerHandle {
    pub id: usize,
    pub bridge: Arc<dyn WorkerBridge>,
}

impl WorkerHandle {
    pub fn new(id: usize, bridge: Arc<dyn WorkerBridge>) -> Self {
        Self { id, bridge }
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_serialize_as_plain_object() {
        let options = OperationOptions::new().with("fix", true).with("stage", "compile");
        let json = serde_json::to_string(&options).unwrap();
        assert_eq!(json, r#"{"fix":true,"stage":"compile"}"#);
        assert!(!options.is_empty());
        assert!(OperationOptions::new().is_empty());
    }

    #[test]
    fn test_compile_result_defaults_cached_false() {
        let res: CompileResult =
            serde_json::from_str(r#"{"code":"x","cache_dependencies":[]}"#).unwrap();
        assert!(!res.cached);
        assert!(res.diagnostics.is_empty());
    }
}

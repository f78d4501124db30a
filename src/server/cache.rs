//! Per-file result cache
//!
//! Each file path owns one [`CacheEntry`]. Operations whose output depends on
//! their options (lint, compile) are keyed by a fingerprint of those options;
//! dependency analysis and module signatures have a single last-write-wins
//! slot.
//!
//! Populated slots are returned as-is. The cache never revalidates on its
//! own: eviction after an edit is the owner's responsibility (see
//! [`ResultCache::evict`]).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::worker::{AnalyzeDependencyResult, CompileResult, LintResult, ModuleSignature, OperationOptions};

/// Fingerprint used for absent or empty option objects
pub const NO_OPTIONS_FINGERPRINT: &str = "none";

/// Stable structural fingerprint of an option object
///
/// Absent and empty objects share [`NO_OPTIONS_FINGERPRINT`]. Anything else
/// is the SHA-256 of its JSON serialization, so key order matters.
pub fn fingerprint(options: Option<&OperationOptions>) -> String {
    match options {
        None => NO_OPTIONS_FINGERPRINT.to_string(),
        Some(options) if options.is_empty() => NO_OPTIONS_FINGERPRINT.to_string(),
        Some(options) => {
            let json = serde_json::to_string(options).unwrap_or_default();
            format!("{:x}", Sha256::digest(json.as_bytes()))
        }
    }
}

/// Cache key for a compile result: `<stage>:<fingerprint>`
pub fn compile_key(stage: &str, options: Option<&OperationOptions>) -> String {
    format!("{}:{}", stage, fingerprint(options))
}

/// Cached results for a single file
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub lint: HashMap<String, LintResult>,
    pub compile: HashMap<String, CompileResult>,
    pub analyze_dependencies: Option<AnalyzeDependencyResult>,
    pub module_signature: Option<ModuleSignature>,
}

impl CacheEntry {
    pub fn is_empty(&self) -> bool {
        self.lint.is_empty()
            && self.compile.is_empty()
            && self.analyze_dependencies.is_none()
            && self.module_signature.is_none()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultCacheStats {
    pub file_count: usize,
    pub lint_results: usize,
    pub compile_results: usize,
}

/// Thread-safe per-file result cache
#[derive(Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the entry for `path`. Unknown paths yield an empty entry.
    pub fn get(&self, path: &Path) -> CacheEntry {
        self.entries.read().get(path).cloned().unwrap_or_default()
    }

    pub fn lint(&self, path: &Path, key: &str) -> Option<LintResult> {
        self.entries.read().get(path).and_then(|e| e.lint.get(key).cloned())
    }

    pub fn compile(&self, path: &Path, key: &str) -> Option<CompileResult> {
        self.entries.read().get(path).and_then(|e| e.compile.get(key).cloned())
    }

    pub fn analyze_dependencies(&self, path: &Path) -> Option<AnalyzeDependencyResult> {
        self.entries
            .read()
            .get(path)
            .and_then(|e| e.analyze_dependencies.clone())
    }

    pub fn module_signature(&self, path: &Path) -> Option<ModuleSignature> {
        self.entries
            .read()
            .get(path)
            .and_then(|e| e.module_signature.clone())
    }

    /// Mutate the entry for `path`, creating it if needed
    pub fn update<F>(&self, path: &Path, f: F)
    where
        F: FnOnce(&mut CacheEntry),
    {
        let mut entries = self.entries.write();
        f(entries.entry(path.to_path_buf()).or_default());
    }

    /// Drop every cached result for `path`
    pub fn evict(&self, path: &Path) -> Option<CacheEntry> {
        self.entries.write().remove(path)
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> ResultCacheStats {
        let entries = self.entries.read();
        ResultCacheStats {
            file_count: entries.len(),
            lint_results: entries.values().map(|e| e.lint.len()).sum(),
            compile_results: entries.values().map(|e| e.compile.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lint_result(save: &str) -> LintResult {
        LintResult {
            diagnostics: vec![],
            save: Some(save.to_string()),
        }
    }

    #[test]
    fn test_empty_options_share_sentinel() {
        assert_eq!(fingerprint(None), NO_OPTIONS_FINGERPRINT);
        assert_eq!(fingerprint(Some(&OperationOptions::new())), NO_OPTIONS_FINGERPRINT);
    }

    #[test]
    fn test_fingerprint_is_stable_and_structural() {
        let a = OperationOptions::new().with("fix", true);
        let b = OperationOptions::new().with("fix", true);
        let c = OperationOptions::new().with("fix", false);
        assert_eq!(fingerprint(Some(&a)), fingerprint(Some(&b)));
        assert_ne!(fingerprint(Some(&a)), fingerprint(Some(&c)));
        assert_eq!(fingerprint(Some(&a)).len(), 64);

        // Same keys, different insertion order: distinct slots
        let ab = OperationOptions::new().with("a", 1).with("b", 2);
        let ba = OperationOptions::new().with("b", 2).with("a", 1);
        assert_ne!(fingerprint(Some(&ab)), fingerprint(Some(&ba)));
    }

    #[test]
    fn test_compile_key_includes_stage() {
        assert_eq!(compile_key("compile", None), "compile:none");
        assert_ne!(compile_key("compile", None), compile_key("compileForBundle", None));
    }

    #[test]
    fn test_update_and_lookup() {
        let cache = ResultCache::new();
        let path = Path::new("/repo/a.js");
        assert!(cache.get(path).is_empty());
        assert!(cache.is_empty());

        cache.update(path, |entry| {
            entry.lint.insert("none".into(), lint_result("one"));
        });
        cache.update(path, |entry| {
            entry.lint.insert("abc".into(), lint_result("two"));
        });

        assert_eq!(cache.lint(path, "none").unwrap().save.as_deref(), Some("one"));
        assert_eq!(cache.lint(path, "abc").unwrap().save.as_deref(), Some("two"));
        assert!(cache.lint(path, "zzz").is_none());
        assert_eq!(
            cache.stats(),
            ResultCacheStats {
                file_count: 1,
                lint_results: 2,
                compile_results: 0
            }
        );
    }

    #[test]
    fn test_singleton_slots_last_write_wins() {
        let cache = ResultCache::new();
        let path = Path::new("/repo/a.js");
        for deps in [vec!["b".to_string()], vec!["c".to_string()]] {
            cache.update(path, |entry| {
                entry.analyze_dependencies = Some(AnalyzeDependencyResult {
                    dependencies: deps,
                    cached: true,
                });
            });
        }
        assert_eq!(cache.analyze_dependencies(path).unwrap().dependencies, vec!["c"]);
    }

    #[test]
    fn test_evict() {
        let cache = ResultCache::new();
        let path = Path::new("/repo/a.js");
        cache.update(path, |entry| {
            entry.module_signature = Some(ModuleSignature {
                filename: "a.js".into(),
                exports: vec![],
            });
        });
        assert!(cache.evict(path).is_some());
        assert!(cache.module_signature(path).is_none());
        assert_eq!(cache.len(), 0);
    }
}

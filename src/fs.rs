//! File metadata, glob matching and editor buffers
//!
//! The dispatcher only needs two things from the file system: a modification
//! time it can compare before and after an operation, and a way to expand an
//! argument path into concrete files. [`MemoryFileSystem`] answers both from
//! disk and additionally keeps unsaved editor buffers in memory.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use parking_lot::RwLock;

/// Options for expanding a path into files
#[derive(Debug, Clone, Default)]
pub struct GlobOptions {
    /// Extensions to keep (without dot). Empty keeps everything.
    pub extensions: Vec<String>,
    /// Extra patterns to exclude
    pub ignore: Vec<String>,
    /// Project ignore patterns
    pub project_ignore: Vec<String>,
    /// Directory ignore patterns are relative to. Defaults to the glob root.
    pub ignore_root: Option<PathBuf>,
    /// Honour `.gitignore` and friends
    pub respect_vcs_ignore: bool,
}

impl GlobOptions {
    pub(crate) fn accepts_extension(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .map(|ext| {
                let ext = ext.to_string_lossy();
                self.extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(&ext))
            })
            .unwrap_or(false)
    }
}

pub trait FileSystem: Send + Sync {
    /// Current modification time, `None` when the file does not exist
    fn maybe_get_mtime(&self, path: &Path) -> Option<SystemTime>;

    /// All files under `root` (or `root` itself) matching `options`
    fn glob(&self, root: &Path, options: &GlobOptions) -> BTreeSet<PathBuf>;

    /// Record unsaved editor content for `path`
    fn add_buffer(&self, path: &Path, content: String);

    fn clear_buffer(&self, path: &Path);

    fn buffer(&self, path: &Path) -> Option<String>;
}

/// Disk-backed file system with in-memory editor buffers
#[derive(Default)]
pub struct MemoryFileSystem {
    buffers: RwLock<HashMap<PathBuf, String>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_overrides(root: &Path, options: &GlobOptions) -> Option<ignore::overrides::Override> {
        let patterns: Vec<&String> = options
            .ignore
            .iter()
            .chain(options.project_ignore.iter())
            .collect();
        if patterns.is_empty() {
            return None;
        }

        let mut builder = OverrideBuilder::new(options.ignore_root.as_deref().unwrap_or(root));
        for pattern in patterns {
            // Override globs are whitelists unless negated
            if let Err(e) = builder.add(&format!("!{}", pattern)) {
                tracing::warn!("[MemoryFileSystem] Skipping invalid ignore pattern {}: {}", pattern, e);
            }
        }
        match builder.build() {
            Ok(overrides) => Some(overrides),
            Err(e) => {
                tracing::warn!("[MemoryFileSystem] Failed to build ignore overrides: {}", e);
                None
            }
        }
    }
}

impl FileSystem for MemoryFileSystem {
    fn maybe_get_mtime(&self, path: &Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
    }

    fn glob(&self, root: &Path, options: &GlobOptions) -> BTreeSet<PathBuf> {
        let mut matches = BTreeSet::new();

        let overrides = Self::build_overrides(root, options);

        if root.is_file() {
            let ignored = overrides
                .as_ref()
                .map(|o| o.matched(root, false).is_ignore())
                .unwrap_or(false);
            if !ignored && options.accepts_extension(root) {
                matches.insert(root.to_path_buf());
            }
            return matches;
        }

        let mut walker = WalkBuilder::new(root);
        walker
            .hidden(true)
            .git_ignore(options.respect_vcs_ignore)
            .git_global(options.respect_vcs_ignore)
            .git_exclude(options.respect_vcs_ignore)
            .ignore(options.respect_vcs_ignore)
            .parents(options.respect_vcs_ignore);
        if let Some(overrides) = overrides {
            walker.overrides(overrides);
        }

        for entry in walker.build() {
            match entry {
                Ok(entry) => {
                    let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
                    if is_file && options.accepts_extension(entry.path()) {
                        matches.insert(entry.into_path());
                    }
                }
                Err(e) => {
                    tracing::debug!("[MemoryFileSystem] Walk error under {}: {}", root.display(), e);
                }
            }
        }

        matches
    }

    fn add_buffer(&self, path: &Path, content: String) {
        self.buffers.write().insert(path.to_path_buf(), content);
    }

    fn clear_buffer(&self, path: &Path) {
        self.buffers.write().remove(path);
    }

    fn buffer(&self, path: &Path) -> Option<String> {
        self.buffers.read().get(path).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/generated")).unwrap();
        std::fs::write(dir.path().join("src/index.js"), "x").unwrap();
        std::fs::write(dir.path().join("src/util.ts"), "y").unwrap();
        std::fs::write(dir.path().join("src/generated/out.js"), "z").unwrap();
        std::fs::write(dir.path().join("README.md"), "r").unwrap();
        dir
    }

    #[test]
    fn test_glob_directory_with_extensions() {
        let dir = fixture();
        let fs = MemoryFileSystem::new();
        let options = GlobOptions {
            extensions: vec!["js".into()],
            ..Default::default()
        };
        let matches = fs.glob(dir.path(), &options);
        assert_eq!(matches.len(), 2);
        assert!(matches.contains(&dir.path().join("src/index.js")));
        assert!(matches.contains(&dir.path().join("src/generated/out.js")));
    }

    #[test]
    fn test_glob_respects_project_ignore() {
        let dir = fixture();
        let fs = MemoryFileSystem::new();
        let options = GlobOptions {
            extensions: vec!["js".into()],
            project_ignore: vec!["src/generated/**".into()],
            ..Default::default()
        };
        let matches = fs.glob(dir.path(), &options);
        assert_eq!(matches.len(), 1);
        assert!(matches.contains(&dir.path().join("src/index.js")));
    }

    #[test]
    fn test_glob_single_file() {
        let dir = fixture();
        let fs = MemoryFileSystem::new();
        let file = dir.path().join("src/util.ts");
        assert_eq!(fs.glob(&file, &GlobOptions::default()).len(), 1);

        let only_js = GlobOptions {
            extensions: vec!["js".into()],
            ..Default::default()
        };
        assert!(fs.glob(&file, &only_js).is_empty());
    }

    #[test]
    fn test_mtime_and_buffers() {
        let dir = fixture();
        let fs = MemoryFileSystem::new();
        let file = dir.path().join("src/index.js");

        assert!(fs.maybe_get_mtime(&file).is_some());
        assert!(fs.maybe_get_mtime(&dir.path().join("missing.js")).is_none());

        let before = fs.maybe_get_mtime(&file);
        fs.add_buffer(&file, "edited".into());
        assert_eq!(fs.buffer(&file).as_deref(), Some("edited"));
        // Buffers never touch the on-disk mtime
        assert_eq!(fs.maybe_get_mtime(&file), before);

        fs.clear_buffer(&file);
        assert!(fs.buffer(&file).is_none());
    }
}

//! Project lookup and transport file references
//!
//! A project is a directory root plus the bits of its configuration the
//! dispatch core cares about: per-category ignore patterns and where they
//! were declared. Loading project configuration is someone else's job; the
//! [`ProjectRegistry`] just holds what it is given.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticLocation, DiagnosticsError};
use crate::error::Result;

pub type ProjectId = u64;

/// Configuration sections that carry their own ignore list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigCategory {
    Lint,
    Format,
    Tests,
}

/// Ignore patterns for one category and the config span declaring them
#[derive(Debug, Clone, Default)]
pub struct IgnoreRule {
    pub patterns: Vec<String>,
    pub declared_at: Option<DiagnosticLocation>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    pub ignore: HashMap<ConfigCategory, IgnoreRule>,
}

impl ProjectConfig {
    pub fn with_ignore(
        mut self,
        category: ConfigCategory,
        patterns: impl IntoIterator<Item = impl Into<String>>,
        declared_at: Option<DiagnosticLocation>,
    ) -> Self {
        self.ignore.insert(
            category,
            IgnoreRule {
                patterns: patterns.into_iter().map(Into::into).collect(),
                declared_at,
            },
        );
        self
    }

    pub fn ignore_patterns(&self, category: ConfigCategory) -> &[String] {
        self.ignore
            .get(&category)
            .map(|rule| rule.patterns.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone)]
pub struct ProjectDefinition {
    pub id: ProjectId,
    pub name: String,
    pub folder: PathBuf,
    pub config: ProjectConfig,
}

/// Lightweight file reference handed to workers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    /// Stable cross-process identifier (`<project>/<relative>`)
    pub uid: String,
    pub project: Option<ProjectId>,
    pub real: PathBuf,
    pub relative: String,
}

pub trait ProjectManager: Send + Sync {
    /// Nearest registered project containing `path`
    fn find_project_existing(&self, path: &Path) -> Option<Arc<ProjectDefinition>>;

    /// Like [`find_project_existing`](Self::find_project_existing) but fails
    /// with a `projectManager/missing` diagnostic
    fn assert_project(
        &self,
        path: &Path,
        location: Option<&DiagnosticLocation>,
    ) -> Result<Arc<ProjectDefinition>> {
        self.find_project_existing(path).ok_or_else(|| {
            let location = location
                .cloned()
                .unwrap_or_else(|| DiagnosticLocation::file(path.display().to_string()));
            DiagnosticsError::single(Diagnostic::new(
                DiagnosticCategory::ProjectMissing,
                format!("Couldn't find a project for {}", path.display()),
                location,
            ))
            .into()
        })
    }

    fn file_reference(&self, path: &Path) -> FileReference;

    /// Config span where `category` ignore patterns were declared for `project`
    fn find_ignore_source(
        &self,
        project: &ProjectDefinition,
        category: ConfigCategory,
    ) -> Option<DiagnosticLocation>;
}

/// In-memory registry of known project roots
#[derive(Default)]
pub struct ProjectRegistry {
    projects: RwLock<Vec<Arc<ProjectDefinition>>>,
    next_id: AtomicU64,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project root. The name defaults to the folder's last component.
    pub fn add_project(&self, folder: PathBuf, config: ProjectConfig) -> Arc<ProjectDefinition> {
        let name = folder
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        let project = Arc::new(ProjectDefinition {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            name,
            folder,
            config,
        });
        tracing::debug!(
            "[ProjectRegistry] Registered project {} at {}",
            project.name,
            project.folder.display()
        );
        self.projects.write().push(Arc::clone(&project));
        project
    }

    pub fn len(&self) -> usize {
        self.projects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.read().is_empty()
    }
}

impl ProjectManager for ProjectRegistry {
    fn find_project_existing(&self, path: &Path) -> Option<Arc<ProjectDefinition>> {
        // Deepest folder wins for nested projects
        self.projects
            .read()
            .iter()
            .filter(|project| path.starts_with(&project.folder))
            .max_by_key(|project| project.folder.components().count())
            .cloned()
    }

    fn file_reference(&self, path: &Path) -> FileReference {
        match self.find_project_existing(path) {
            Some(project) => {
                let relative = path
                    .strip_prefix(&project.folder)
                    .unwrap_or(path)
                    .to_string_lossy()
                    .replace('\\', "/");
                FileReference {
                    uid: format!("{}/{}", project.name, relative),
                    project: Some(project.id),
                    real: path.to_path_buf(),
                    relative,
                }
            }
            None => {
                let relative = path.to_string_lossy().replace('\\', "/");
                FileReference {
                    uid: relative.clone(),
                    project: None,
                    real: path.to_path_buf(),
                    relative,
                }
            }
        }
    }

    fn find_ignore_source(
        &self,
        project: &ProjectDefinition,
        category: ConfigCategory,
    ) -> Option<DiagnosticLocation> {
        project
            .config
            .ignore
            .get(&category)
            .and_then(|rule| rule.declared_at.clone())
    }
}

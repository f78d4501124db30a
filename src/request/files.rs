//! Argument resolution and file set matching
//!
//! Arguments resolve independently and in order to an absolute path plus the
//! project owning it. Each resolved path is then expanded into concrete
//! files. An argument that matches nothing is an error unless suppressed; the
//! resulting diagnostic re-runs the match with project ignores disabled so it
//! can say which files were ignored and where the ignore rule lives.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::diagnostics::{
    no_files_found_message, Diagnostic, DiagnosticAdvice, DiagnosticCategory, DiagnosticLocation,
    DiagnosticsError,
};
use crate::error::Result;
use crate::fs::GlobOptions;
use crate::project::{ConfigCategory, ProjectDefinition, ProjectId};
use crate::resolver::{RequestedType, ResolverQuery, ResolverResponse};

use super::{SerializeTarget, ServerRequest};

/// Maps an argument to an alternate source to try first
pub type AlternateArg = Arc<dyn Fn(&Path) -> Option<PathBuf> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ResolvedArg {
    /// Position in the argument list (`None` for the implicit cwd project)
    pub index: Option<usize>,
    pub path: PathBuf,
    pub location: DiagnosticLocation,
    pub project: Arc<ProjectDefinition>,
}

pub type ResolvedArgs = Vec<ResolvedArg>;

#[derive(Clone, Default)]
pub struct GetFilesOptions {
    pub glob: GlobOptions,
    pub try_alternate_arg: Option<AlternateArg>,
    /// Arguments matching nothing are not an error
    pub ignore_argument_misses: bool,
    /// Match as if projects declared no ignore patterns
    pub ignore_project_ignore: bool,
    /// Extra advice for "no files found" diagnostics
    pub advice: Vec<DiagnosticAdvice>,
    /// Which project ignore list applies
    pub config_category: Option<ConfigCategory>,
    /// What the command does to files, for "No files to <noun> found"
    pub noun: Option<String>,
    /// Use these instead of the query arguments
    pub args: Option<Vec<String>>,
}

impl std::fmt::Debug for GetFilesOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetFilesOptions")
            .field("glob", &self.glob)
            .field("ignore_argument_misses", &self.ignore_argument_misses)
            .field("ignore_project_ignore", &self.ignore_project_ignore)
            .field("config_category", &self.config_category)
            .field("args", &self.args)
            .finish()
    }
}

/// Matched files and the projects they belong to
#[derive(Debug, Clone, Default)]
pub struct GetFilesResult {
    pub paths: BTreeSet<PathBuf>,
    pub projects: BTreeMap<ProjectId, Arc<ProjectDefinition>>,
}

impl GetFilesResult {
    pub fn add_project(&mut self, project: Arc<ProjectDefinition>) {
        self.projects.entry(project.id).or_insert(project);
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }
}

impl ServerRequest {
    /// Resolve raw arguments to absolute paths bound to projects
    ///
    /// With no arguments and no `override_args`, the single target is the
    /// project root of the client's cwd. Explicitly passing an empty override
    /// resolves to nothing.
    pub async fn resolve_files_from_args(
        &self,
        override_args: Option<&[String]>,
        try_alternate_arg: Option<&AlternateArg>,
    ) -> Result<(ResolvedArgs, GetFilesResult)> {
        self.check_cancelled()?;

        let mut projects = GetFilesResult::default();
        let mut resolved_args = Vec::new();
        let raw_args = override_args.unwrap_or(self.query().args.as_slice());
        let cwd = &self.client().flags.cwd;

        if raw_args.is_empty() && override_args.is_none() {
            let location = self.diagnostic_pointer_for_client_cwd();
            let project = self.assert_client_cwd_project()?;
            projects.add_project(Arc::clone(&project));
            resolved_args.push(ResolvedArg {
                index: None,
                path: project.folder.clone(),
                location,
                project,
            });
            return Ok((resolved_args, projects));
        }

        let resolver = self.server().resolver();
        for (index, arg) in raw_args.iter().enumerate() {
            let location = self.diagnostic_pointer_from_flags(&SerializeTarget::Arg(index));
            let source = PathBuf::from(arg);

            let mut resolved = None;
            if let Some(alternate) = try_alternate_arg {
                if let Some(alternate_source) = (alternate.as_ref())(&source) {
                    let query = ResolverQuery::new(cwd.clone(), alternate_source, RequestedType::Folder);
                    if let ResolverResponse::Found { path } = resolver.resolve_entry(&query).await {
                        resolved = Some(path);
                    }
                }
            }

            let path = match resolved {
                Some(path) => path,
                None => {
                    let query = ResolverQuery::new(cwd.clone(), source, RequestedType::Folder);
                    resolver.resolve_entry_assert(&query, &location).await?
                }
            };

            let project = self.server().projects().assert_project(&path, Some(&location))?;
            projects.add_project(Arc::clone(&project));
            resolved_args.push(ResolvedArg {
                index: Some(index),
                path,
                location,
                project,
            });
        }

        Ok((resolved_args, projects))
    }

    /// Glob options for one argument, with its project's ignore list applied
    fn glob_options_for(&self, arg: &ResolvedArg, opts: &GetFilesOptions, ignore_project_ignore: bool) -> GlobOptions {
        let mut glob = opts.glob.clone();
        if let Some(category) = opts.config_category {
            if !ignore_project_ignore {
                glob.project_ignore = arg.project.config.ignore_patterns(category).to_vec();
                glob.ignore_root = Some(arg.project.folder.clone());
            }
        }
        glob
    }

    /// Resolve arguments and expand them into a concrete file set
    pub async fn get_files_from_args(&self, opts: &GetFilesOptions) -> Result<GetFilesResult> {
        self.check_cancelled()?;

        let (resolved_args, mut result) = self
            .resolve_files_from_args(opts.args.as_deref(), opts.try_alternate_arg.as_ref())
            .await?;

        let fs = self.server().fs();
        let mut no_arg_matches = Vec::new();

        for arg in &resolved_args {
            let glob = self.glob_options_for(arg, opts, opts.ignore_project_ignore);
            let matches = fs.glob(&arg.path, &glob);
            if matches.is_empty() {
                if !opts.ignore_argument_misses {
                    no_arg_matches.push(arg);
                }
            } else {
                result.paths.extend(matches);
            }
        }

        if no_arg_matches.is_empty() {
            tracing::debug!(
                "[ServerRequest] Request {} matched {} files from {} arguments",
                self.id,
                result.paths.len(),
                resolved_args.len()
            );
            return Ok(result);
        }

        let diagnostics = no_arg_matches
            .into_iter()
            .map(|arg| self.no_match_diagnostic(arg, opts, &result.paths))
            .collect();

        Err(DiagnosticsError::new(
            "Some arguments did not resolve to any files",
            diagnostics,
        )
        .into())
    }

    fn no_match_diagnostic(
        &self,
        arg: &ResolvedArg,
        opts: &GetFilesOptions,
        found: &BTreeSet<PathBuf>,
    ) -> Diagnostic {
        let mut advice = opts.advice.clone();

        if let (Some(category), false) = (opts.config_category, opts.ignore_project_ignore) {
            // Hint if all files were ignored
            let glob = self.glob_options_for(arg, opts, true);
            let without_ignore: Vec<String> = self
                .server()
                .fs()
                .glob(&arg.path, &glob)
                .into_iter()
                .filter(|path| !found.contains(path))
                .map(|path| path.display().to_string())
                .collect();

            if !without_ignore.is_empty() {
                advice.push(DiagnosticAdvice::info("The following files were ignored"));
                advice.push(DiagnosticAdvice::List {
                    list: without_ignore,
                    truncate: true,
                });

                if let Some(declared_at) = self
                    .server()
                    .projects()
                    .find_ignore_source(&arg.project, category)
                {
                    advice.push(DiagnosticAdvice::info("Ignore patterns were defined here"));
                    advice.push(DiagnosticAdvice::Frame {
                        location: declared_at,
                    });
                }
            }
        }

        Diagnostic::new(
            DiagnosticCategory::ArgsFileNotFound,
            no_files_found_message(opts.noun.as_deref()),
            arg.location.with_marker(arg.path.display().to_string()),
        )
        .with_advice(advice)
    }
}

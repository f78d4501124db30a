//! CLI argument definitions using clap
//!
//! Each subcommand becomes one [`ServerQuery`] against an in-process server.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};

use crate::commands::{EXT_FLAG, IGNORE_MISSES_FLAG};
use crate::request::ServerQuery;
use crate::server::ServerConfig;

/// Resolve arguments to files the way server commands do
#[derive(Parser, Debug)]
#[command(name = "dispatch")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Client working directory (defaults to the process cwd)
    #[arg(long, env = "DISPATCH_CWD", global = true)]
    pub cwd: Option<PathBuf>,

    /// Watch mode debounce in milliseconds
    #[arg(long, env = "DISPATCH_DEBOUNCE_MS", default_value_t = 100, global = true)]
    pub debounce_ms: u64,

    /// How often an operation is retried when its file keeps changing
    #[arg(long, env = "DISPATCH_MAX_RETRIES", default_value_t = 25, global = true)]
    pub max_retries: usize,

    /// Report how long the request took
    #[arg(long, global = true)]
    pub timing: bool,

    /// Include timing markers in the response
    #[arg(long, global = true)]
    pub markers: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the files the arguments resolve to
    Ls(FilesArgs),

    /// Print the matched files, then every batch of changes, until Ctrl-C
    Watch(FilesArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FilesArgs {
    /// Files or directories (defaults to the project of the cwd)
    pub args: Vec<String>,

    /// Only match these extensions
    #[arg(long, value_delimiter = ',')]
    pub ext: Vec<String>,

    /// Arguments that match no files are not an error
    #[arg(long)]
    pub ignore_misses: bool,
}

impl Cli {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            max_mtime_retries: self.max_retries,
            ..ServerConfig::default()
        }
    }

    pub fn is_watch(&self) -> bool {
        matches!(self.command, Commands::Watch(_))
    }

    pub fn query(&self) -> ServerQuery {
        let (name, files) = match &self.command {
            Commands::Ls(files) => ("ls", files),
            Commands::Watch(files) => ("watch", files),
        };

        let mut query = ServerQuery::new(name).with_args(files.args.iter().cloned());
        if !files.ext.is_empty() {
            query.command_flags.insert(EXT_FLAG.to_string(), json!(files.ext));
        }
        if files.ignore_misses {
            query
                .command_flags
                .insert(IGNORE_MISSES_FLAG.to_string(), Value::Bool(true));
        }
        query.request_flags.timing = self.timing;
        query.request_flags.collect_markers = self.markers;
        query
    }
}

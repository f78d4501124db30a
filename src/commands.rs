//! Built-in server commands
//!
//! - `ls` resolves its arguments and returns the matched files
//! - `watch` reports the matched files, then every debounced batch of
//!   changes, until the request is cancelled

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{DispatchError, Result};
use crate::project::ConfigCategory;
use crate::request::{FlagError, GetFilesOptions, GetFilesResult, SerializeTarget, ServerRequest};
use crate::server::{Server, ServerCommand};

pub const EXT_FLAG: &str = "ext";
pub const IGNORE_MISSES_FLAG: &str = "ignoreMisses";

fn default_file_flags() -> BTreeMap<String, Value> {
    let mut flags = BTreeMap::new();
    flags.insert(EXT_FLAG.to_string(), json!([]));
    flags.insert(IGNORE_MISSES_FLAG.to_string(), json!(false));
    flags
}

/// Build file matching options from `--ext` and `--ignore-misses`
fn file_options(request: &ServerRequest, noun: &str) -> Result<GetFilesOptions> {
    let flags = &request.query().command_flags;

    let extensions = match flags.get(EXT_FLAG) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(ext)) => vec![ext.clone()],
        Some(Value::Array(values)) => values
            .iter()
            .map(|value| value.as_str().map(String::from))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                request.diagnostic_flag_error(FlagError::new(
                    "Expected every extension to be a string",
                    SerializeTarget::Flag(EXT_FLAG.to_string()),
                ))
            })?,
        Some(_) => {
            return Err(request.diagnostic_flag_error(FlagError::new(
                "Expected an extension or a list of extensions",
                SerializeTarget::Flag(EXT_FLAG.to_string()),
            )))
        }
    };

    let extensions: Vec<String> = extensions
        .into_iter()
        .map(|ext| ext.trim_start_matches('.').to_string())
        .collect();
    if extensions.iter().any(String::is_empty) {
        return Err(request.diagnostic_flag_error(FlagError::new(
            "Extensions cannot be empty",
            SerializeTarget::Flag(EXT_FLAG.to_string()),
        )));
    }

    let mut opts = GetFilesOptions {
        ignore_argument_misses: flags
            .get(IGNORE_MISSES_FLAG)
            .and_then(Value::as_bool)
            .unwrap_or(false),
        config_category: Some(ConfigCategory::Lint),
        noun: Some(noun.to_string()),
        ..Default::default()
    };
    opts.glob.extensions = extensions;
    opts.glob.respect_vcs_ignore = true;
    Ok(opts)
}

fn paths_json(result: &GetFilesResult) -> Value {
    Value::from(
        result
            .paths
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>(),
    )
}

pub struct ListFilesCommand;

#[async_trait]
impl ServerCommand for ListFilesCommand {
    fn default_flags(&self) -> BTreeMap<String, Value> {
        default_file_flags()
    }

    async fn call(&self, request: &Arc<ServerRequest>) -> Result<Option<Value>> {
        let opts = file_options(request, "list")?;
        let result = request.get_files_from_args(&opts).await?;
        if result.is_empty() {
            return Ok(None);
        }
        Ok(Some(paths_json(&result)))
    }
}

pub struct WatchFilesCommand;

#[async_trait]
impl ServerCommand for WatchFilesCommand {
    fn default_flags(&self) -> BTreeMap<String, Value> {
        default_file_flags()
    }

    async fn call(&self, request: &Arc<ServerRequest>) -> Result<Option<Value>> {
        let opts = file_options(request, "watch")?;
        let reporter = Arc::clone(&request.client().reporter);

        request
            .watch_files_from_args(opts, move |result, initial| {
                let reporter = Arc::clone(&reporter);
                async move {
                    let batch = json!({ "initial": initial, "paths": paths_json(&result) });
                    reporter.info(&batch.to_string());
                    Ok(())
                }
            })
            .await?;

        // Runs until the client goes away
        request.wait_for_end().await;
        Err(DispatchError::Cancelled)
    }
}

pub fn register_builtin_commands(server: &Server) {
    server.register_command("ls", Arc::new(ListFilesCommand));
    server.register_command("watch", Arc::new(WatchFilesCommand));
}

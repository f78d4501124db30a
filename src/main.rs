//! dispatch CLI entry point
//!
//! Runs a single query against an in-process server whose only project is
//! the client cwd. `watch` additionally starts an OS file watcher feeding the
//! server's refresh channel and runs until Ctrl-C.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use dispatch_core::cli::Cli;
use dispatch_core::commands::register_builtin_commands;
use dispatch_core::error::DispatchError;
use dispatch_core::fs::MemoryFileSystem;
use dispatch_core::project::{ProjectConfig, ProjectRegistry};
use dispatch_core::resolver::FsResolver;
use dispatch_core::server::{
    ClientFlags, Collaborators, FileWatcher, Reporter, Server, ServerClient, StickyAllocator,
};

/// Prints status lines to stdout
struct StdoutReporter;

impl Reporter for StdoutReporter {
    fn info(&self, message: &str) {
        println!("{}", message);
    }

    fn teardown(&self) {}
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                "dispatch_core=info"
                    .parse()
                    .unwrap_or_else(|_| LevelFilter::INFO.into()),
            ),
        )
        .init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let cwd = match &cli.cwd {
        Some(cwd) => cwd.clone(),
        None => std::env::current_dir()?,
    };

    let projects = Arc::new(ProjectRegistry::new());
    projects.add_project(cwd.clone(), ProjectConfig::default());

    // Neither built-in command talks to workers
    let server = Server::new(
        cli.server_config(),
        Collaborators {
            allocator: Arc::new(StickyAllocator::new(Vec::new())),
            fs: Arc::new(MemoryFileSystem::new()),
            resolver: Arc::new(FsResolver::new()),
            projects,
        },
    );
    register_builtin_commands(&server);

    let client = Arc::new(ServerClient::new(
        0,
        ClientFlags::new(cwd.clone()),
        Arc::new(StdoutReporter),
    ));

    let _watcher = if cli.is_watch() {
        let handle = FileWatcher::new(cwd).start(Arc::clone(&server))?;
        let server = Arc::clone(&server);
        let client_id = client.id;
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, stopping watch");
                server.cancel_client_requests(client_id);
            }
        });
        Some(handle)
    } else {
        None
    };

    let res = server.handle_query(client, cli.query()).await;
    let code = match res.error() {
        None => ExitCode::SUCCESS,
        Some(DispatchError::Cancelled) if cli.is_watch() => return Ok(ExitCode::SUCCESS),
        Some(err) => err.exit_code(),
    };

    println!("{}", serde_json::to_string_pretty(&res)?);
    Ok(code)
}

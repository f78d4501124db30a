//! dispatch-core: request dispatch for a multi-process source toolchain
//!
//! A long-lived [`Server`] accepts client queries, turns each into a
//! [`ServerRequest`], resolves command arguments to concrete files, and
//! dispatches per-file operations (parse, format, lint, compile, dependency
//! analysis) to the worker owning the file.
//!
//! # Guarantees
//!
//! - Operations on one file never overlap (per-path async locks)
//! - A result computed while its file changed on disk is discarded and the
//!   operation re-run
//! - Lint, compile, dependency and signature results are cached per file and
//!   keyed by an options fingerprint
//! - Watch mode delivers changed files in debounced batches, one callback at
//!   a time
//!
//! # Example
//!
//! ```ignore
//! use dispatch_core::server::{Server, ServerConfig};
//!
//! let server = Server::new(ServerConfig::default(), collaborators);
//! dispatch_core::commands::register_builtin_commands(&server);
//! let res = server.handle_query(client, ServerQuery::new("ls").with_args(["src"])).await;
//! ```

pub mod cli;
pub mod commands;
pub mod diagnostics;
pub mod error;
pub mod fs;
pub mod project;
pub mod request;
pub mod resolver;
pub mod server;
pub mod worker;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticLocation, Diagnostics, DiagnosticsError};
pub use error::{DispatchError, Result};
pub use request::{GetFilesOptions, GetFilesResult, ServerQuery, ServerQueryResponse, ServerRequest};
pub use server::{Collaborators, Server, ServerCommand, ServerConfig};
pub use worker::{WorkerBridge, WorkerHandle};

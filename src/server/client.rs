//! Connected clients and their output channel

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-client output channel. Rendering is the client's business; the
/// request only writes status lines and closes it on teardown.
pub trait Reporter: Send + Sync {
    fn info(&self, message: &str);

    /// Flush and close. Called exactly once per request.
    fn teardown(&self);
}

/// Reporter that forwards to `tracing`
#[derive(Debug, Default)]
pub struct TracingReporter {
    closed: AtomicBool,
}

impl TracingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Reporter for TracingReporter {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn teardown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct ClientFlags {
    pub cwd: PathBuf,
    pub client_name: String,
}

impl ClientFlags {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            client_name: "cli".to_string(),
        }
    }
}

pub struct ServerClient {
    pub id: u64,
    pub flags: ClientFlags,
    pub reporter: Arc<dyn Reporter>,
}

impl ServerClient {
    pub fn new(id: u64, flags: ClientFlags, reporter: Arc<dyn Reporter>) -> Self {
        Self { id, flags, reporter }
    }
}

//! OS file watching
//!
//! Uses the `notify` crate to watch a directory tree and publish every
//! relevant change through [`Server::refresh_file`], where watch-mode
//! requests pick it up.
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────────┐
//! │   notify    │────>│  debouncer  │────>│ refresh channel  │
//! │   watcher   │     │  (100ms)    │     │ (watch requests) │
//! └─────────────┘     └─────────────┘     └──────────────────┘
//! ```

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};

use crate::error::{DispatchError, Result};

use super::Server;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debounce duration for raw OS events (default: 100ms)
    pub debounce_duration: Duration,
    /// Directory names never reported
    pub ignored_dirs: Vec<String>,
    /// Extensions to report (empty = all)
    pub extensions: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(100),
            ignored_dirs: ["node_modules", "target", "dist", "build"]
                .into_iter()
                .map(String::from)
                .collect(),
            extensions: vec![],
        }
    }
}

fn watch_error(e: notify::Error) -> DispatchError {
    DispatchError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

/// Feeds OS change events under `root` into a server's refresh channel
pub struct FileWatcher {
    root: PathBuf,
    config: WatcherConfig,
    running: Arc<AtomicBool>,
}

impl FileWatcher {
    pub fn new(root: PathBuf) -> Self {
        Self::with_config(root, WatcherConfig::default())
    }

    pub fn with_config(root: PathBuf, config: WatcherConfig) -> Self {
        Self {
            root,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start watching on a background thread
    pub fn start(&self, server: Arc<Server>) -> Result<WatcherHandle> {
        if self.running.swap(true, Ordering::SeqCst) {
            // Already running
            return Ok(WatcherHandle {
                running: Arc::clone(&self.running),
            });
        }

        let (tx, rx) = std::sync::mpsc::channel();
        let mut debouncer = match new_debouncer(self.config.debounce_duration, tx) {
            Ok(debouncer) => debouncer,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(watch_error(e));
            }
        };
        if let Err(e) = debouncer.watcher().watch(&self.root, RecursiveMode::Recursive) {
            self.running.store(false, Ordering::SeqCst);
            return Err(watch_error(e));
        }

        tracing::info!("[WATCHER] Watching {}", self.root.display());

        let running = Arc::clone(&self.running);
        let config = self.config.clone();
        std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                match rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(Ok(events)) => {
                        tracing::debug!("[WATCHER] Received {} raw events", events.len());
                        for event in events {
                            if !matches!(event.kind, DebouncedEventKind::Any) {
                                continue;
                            }
                            if Self::should_watch_path(&event.path, &config) {
                                server.refresh_file(&event.path);
                            } else {
                                tracing::trace!("[WATCHER] Filtered out: {:?}", event.path);
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        tracing::error!("[WATCHER] Watcher error: {:?}", e);
                    }
                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }

            // Keep debouncer alive until thread exits
            drop(debouncer);
            tracing::debug!("[WATCHER] Stopped");
        });

        Ok(WatcherHandle {
            running: Arc::clone(&self.running),
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn should_watch_path(path: &Path, config: &WatcherConfig) -> bool {
        for component in path.components() {
            if let Component::Normal(name) = component {
                let name = name.to_string_lossy();
                if name.starts_with('.') || config.ignored_dirs.iter().any(|dir| *dir == name) {
                    return false;
                }
            }
        }

        if config.extensions.is_empty() {
            return true;
        }
        path.extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                config.extensions.iter().any(|allowed| *allowed == ext)
            })
            .unwrap_or(false)
    }
}

/// Handle for controlling a running watcher; dropping it stops the watcher
pub struct WatcherHandle {
    running: Arc<AtomicBool>,
}

impl WatcherHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

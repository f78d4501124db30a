//! Per-command request lifecycle
//!
//! A [`ServerRequest`] lives for exactly one client command. It tracks
//! cancellation and teardown, collects timing markers, builds argument
//! diagnostics, and is the entry point for file resolution, watching and
//! worker dispatch (see the `files`, `watch` and `dispatch` submodules).
//!
//! # Lifecycle
//!
//! ```text
//! active ──cancel()──► cancelled + toredown (CANCELLED)
//!    │
//!    └──teardown(res)──► toredown (at most once)
//! ```
//!
//! Teardown reshapes the response, cancels every registered subscription,
//! closes the reporter, publishes the end status and tells the server the
//! request is gone. A second teardown is a no-op returning `None`.

pub mod dispatch;
pub mod files;
pub mod location;
pub mod query;
pub mod watch;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch as watch_channel;

use crate::diagnostics::{
    Diagnostic, DiagnosticAdvice, DiagnosticCategory, DiagnosticDescription, DiagnosticLocation,
};
use crate::error::{DispatchError, Result};
use crate::project::ProjectDefinition;
use crate::resolver::{RequestedType, ResolverQuery};
use crate::server::{Server, ServerClient};

pub use files::{AlternateArg, GetFilesOptions, GetFilesResult, ResolvedArg, ResolvedArgs};
pub use location::SerializeTarget;
pub use query::{RequestFlags, ServerMarker, ServerQuery, ServerQueryResponse, UnfinishedMarker};
pub use watch::WatchSubscription;

/// Something a request cancels when it ends
pub trait Subscription: Send + Sync {
    /// Idempotent
    fn unsubscribe(&self);
}

/// Published on the request's end channel
#[derive(Debug, Clone, PartialEq)]
pub enum RequestStatus {
    Active,
    Ended(Option<ServerQueryResponse>),
}

/// Command flags after command-specific normalization
#[derive(Debug, Clone, Default)]
pub struct NormalizedCommandFlags {
    pub flags: BTreeMap<String, Value>,
    pub default_flags: BTreeMap<String, Value>,
}

/// Description for an argument/flag validation failure
#[derive(Debug, Clone)]
pub struct FlagError {
    pub message: String,
    pub category: Option<DiagnosticCategory>,
    pub advice: Vec<DiagnosticAdvice>,
    pub target: SerializeTarget,
    pub show_help: bool,
}

impl FlagError {
    pub fn new(message: impl Into<String>, target: SerializeTarget) -> Self {
        Self {
            message: message.into(),
            category: None,
            advice: Vec::new(),
            target,
            show_help: true,
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct ServerRequest {
    pub id: u64,
    server: Arc<Server>,
    client: Arc<ServerClient>,
    query: ServerQuery,
    start: Instant,
    cancelled: AtomicBool,
    toredown: AtomicBool,
    /// `Some` once marker collection has been installed
    markers: Mutex<Option<Vec<ServerMarker>>>,
    subscriptions: Mutex<Vec<Arc<dyn Subscription>>>,
    status: watch_channel::Sender<RequestStatus>,
    normalized_flags: Mutex<NormalizedCommandFlags>,
}

impl ServerRequest {
    pub fn new(server: Arc<Server>, client: Arc<ServerClient>, query: ServerQuery) -> Arc<Self> {
        let (status, _) = watch_channel::channel(RequestStatus::Active);
        Arc::new(Self {
            id: server.next_request_id(),
            server,
            client,
            query,
            start: Instant::now(),
            cancelled: AtomicBool::new(false),
            toredown: AtomicBool::new(false),
            markers: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            status,
            normalized_flags: Mutex::new(NormalizedCommandFlags::default()),
        })
    }

    /// Install marker collection if requested and register with the server
    pub fn init(self: &Arc<Self>) {
        if self.query.request_flags.collect_markers {
            *self.markers.lock() = Some(Vec::new());
        }
        self.server.handle_request_start(self);
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn client(&self) -> &Arc<ServerClient> {
        &self.client
    }

    pub fn query(&self) -> &ServerQuery {
        &self.query
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_toredown(&self) -> bool {
        self.toredown.load(Ordering::SeqCst)
    }

    /// Cancellation checkpoint
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DispatchError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.teardown(Some(ServerQueryResponse::Cancelled));
    }

    /// Finalize the request. Runs at most once; later calls return `None`.
    pub fn teardown(&self, res: Option<ServerQueryResponse>) -> Option<ServerQueryResponse> {
        if self.toredown.swap(true, Ordering::SeqCst) {
            return None;
        }

        if self.query.request_flags.timing {
            let elapsed = self.start.elapsed();
            self.client
                .reporter
                .info(&format!("Request took {}ms", elapsed.as_millis()));
        }

        let res = res.map(|res| {
            if self.query.no_data {
                res.redact()
            } else {
                let markers = self.markers.lock().clone().unwrap_or_default();
                res.with_markers(markers)
            }
        });

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in subscriptions {
            subscription.unsubscribe();
        }

        self.client.reporter.teardown();
        self.status.send_replace(RequestStatus::Ended(res.clone()));
        self.server.handle_request_end(self);
        res
    }

    /// Tie `subscription` to this request's lifetime. Already torn down
    /// requests cancel it immediately.
    pub fn register_subscription(&self, subscription: Arc<dyn Subscription>) {
        let mut subscriptions = self.subscriptions.lock();
        if self.is_toredown() {
            drop(subscriptions);
            subscription.unsubscribe();
        } else {
            subscriptions.push(subscription);
        }
    }

    pub fn subscribe_status(&self) -> watch_channel::Receiver<RequestStatus> {
        self.status.subscribe()
    }

    /// The response published by teardown, `None` while active
    pub fn final_response(&self) -> Option<ServerQueryResponse> {
        match &*self.status.borrow() {
            RequestStatus::Active => None,
            RequestStatus::Ended(res) => res.clone(),
        }
    }

    /// Wait until teardown has run and return its response
    pub async fn wait_for_end(&self) -> Option<ServerQueryResponse> {
        let mut rx = self.status.subscribe();
        loop {
            if let RequestStatus::Ended(res) = &*rx.borrow_and_update() {
                return res.clone();
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    // ========================================================================
    // Markers
    // ========================================================================

    pub fn start_marker(
        &self,
        label: impl Into<String>,
        facet: impl Into<String>,
        row_id: impl Into<String>,
    ) -> UnfinishedMarker {
        let marker = UnfinishedMarker {
            label: label.into(),
            facet: facet.into(),
            row_id: row_id.into(),
            start: now_millis(),
        };
        tracing::debug!("[ServerRequest] Started marker {}", marker.label);
        marker
    }

    pub fn end_marker(&self, marker: UnfinishedMarker) -> ServerMarker {
        let marker = marker.finish(now_millis());
        tracing::debug!("[ServerRequest] Finished marker {}", marker.label);
        if let Some(markers) = self.markers.lock().as_mut() {
            markers.push(marker.clone());
        }
        marker
    }

    pub fn markers(&self) -> Vec<ServerMarker> {
        self.markers.lock().clone().unwrap_or_default()
    }

    // ========================================================================
    // Argument and flag diagnostics
    // ========================================================================

    pub fn set_normalized_command_flags(&self, normalized: NormalizedCommandFlags) {
        *self.normalized_flags.lock() = normalized;
    }

    /// Flags that differ from their defaults, normalized values winning
    fn effective_flags(&self) -> BTreeMap<String, Value> {
        let normalized = self.normalized_flags.lock();
        let mut flags = self.query.command_flags.clone();
        flags.extend(normalized.flags.clone());
        flags.retain(|name, value| normalized.default_flags.get(name) != Some(value));
        flags
    }

    pub fn diagnostic_pointer_from_flags(&self, target: &SerializeTarget) -> DiagnosticLocation {
        let flags = self.effective_flags();
        location::serialize_cli_location(
            &location::CommandLine {
                program_name: &self.server.config().program_name,
                command_name: &self.query.command_name,
                args: &self.query.args,
                flags: &flags,
            },
            target,
        )
    }

    pub fn diagnostic_pointer_for_client_cwd(&self) -> DiagnosticLocation {
        location::whole_text_location(&self.client.flags.cwd.to_string_lossy(), "cwd")
    }

    /// Build an `INVALID_REQUEST` error pointing at `error.target`
    pub fn diagnostic_flag_error(&self, error: FlagError) -> DispatchError {
        let location = self.diagnostic_pointer_from_flags(&error.target);
        let category = error.category.unwrap_or(if error.target.is_arg() {
            DiagnosticCategory::ArgsInvalid
        } else {
            DiagnosticCategory::FlagsInvalid
        });

        DispatchError::InvalidRequest {
            message: error.message.clone(),
            diagnostics: vec![Diagnostic {
                description: DiagnosticDescription {
                    category,
                    message: error.message,
                    advice: error.advice,
                },
                location,
            }],
            show_help: error.show_help,
        }
    }

    pub fn expect_argument_length(&self, min: usize, max: usize) -> Result<()> {
        let len = self.query.args.len();

        let message = if min == max {
            if len == min {
                None
            } else if min == 0 {
                Some("Expected no arguments".to_string())
            } else {
                Some(format!("Expected exactly {} arguments", min))
            }
        } else if len < min {
            Some(format!("Expected at least {} arguments", min))
        } else if len > max {
            Some(format!("Expected no more than {} arguments", max))
        } else {
            None
        };

        match message {
            Some(message) => Err(self.diagnostic_flag_error(FlagError::new(
                message,
                SerializeTarget::ArgRange { from: min, to: max },
            ))),
            None => Ok(()),
        }
    }

    pub fn assert_client_cwd_project(&self) -> Result<Arc<ProjectDefinition>> {
        let location = self.diagnostic_pointer_for_client_cwd();
        self.server
            .projects()
            .assert_project(&self.client.flags.cwd, Some(&location))
    }

    /// Resolve argument `index` as an entry path, failing at its span
    pub async fn resolve_entry_assert_path_arg(&self, index: usize) -> Result<PathBuf> {
        self.expect_argument_length(index + 1, index + 1)?;
        let location = self.diagnostic_pointer_from_flags(&SerializeTarget::Arg(index));
        let query = ResolverQuery::new(
            self.client.flags.cwd.clone(),
            &self.query.args[index],
            RequestedType::Any,
        );
        self.server
            .resolver()
            .resolve_entry_assert(&query, &location)
            .await
    }
}

impl std::fmt::Debug for ServerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRequest")
            .field("id", &self.id)
            .field("command", &self.query.command_name)
            .field("cancelled", &self.is_cancelled())
            .field("toredown", &self.is_toredown())
            .finish()
    }
}

//! Client query and response shapes

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diagnostics::{Diagnostic, DiagnosticsError};
use crate::error::DispatchError;

/// Flags that shape how a request runs, independent of the command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFlags {
    /// Record timing markers and return them with a successful response
    #[serde(default)]
    pub collect_markers: bool,
    /// Report total request duration on teardown
    #[serde(default)]
    pub timing: bool,
}

/// A client command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerQuery {
    pub command_name: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Command flag values as given by the client
    #[serde(default)]
    pub command_flags: BTreeMap<String, Value>,
    #[serde(default)]
    pub request_flags: RequestFlags,
    /// The client wants to know whether there was output, not the output
    #[serde(default)]
    pub no_data: bool,
}

impl ServerQuery {
    pub fn new(command_name: impl Into<String>) -> Self {
        Self {
            command_name: command_name.into(),
            ..Self::default()
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Finished timing span recorded around a dispatched operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMarker {
    pub label: String,
    pub facet: String,
    pub row_id: String,
    /// Unix millis
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnfinishedMarker {
    pub label: String,
    pub facet: String,
    pub row_id: String,
    pub start: i64,
}

impl UnfinishedMarker {
    pub fn finish(self, end: i64) -> ServerMarker {
        ServerMarker {
            label: self.label,
            facet: self.facet,
            row_id: self.row_id,
            start: self.start,
            end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerQueryResponse {
    Success {
        has_data: bool,
        data: Option<Value>,
        markers: Vec<ServerMarker>,
    },
    Diagnostics {
        diagnostics: Vec<Diagnostic>,
        has_diagnostics: bool,
    },
    InvalidRequest {
        diagnostics: Vec<Diagnostic>,
        show_help: bool,
    },
    Cancelled,
}

impl ServerQueryResponse {
    pub fn success(data: Option<Value>) -> Self {
        Self::Success {
            has_data: data.is_some(),
            data,
            markers: Vec::new(),
        }
    }

    pub fn diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        Self::Diagnostics {
            has_diagnostics: !diagnostics.is_empty(),
            diagnostics,
        }
    }

    /// Strip payloads for a `no_data` query, keeping only the presence flags
    pub fn redact(self) -> Self {
        match self {
            Self::Success { data, .. } => Self::Success {
                has_data: data.is_some(),
                data: None,
                markers: Vec::new(),
            },
            Self::Diagnostics {
                has_diagnostics, ..
            } => Self::Diagnostics {
                diagnostics: Vec::new(),
                has_diagnostics,
            },
            Self::InvalidRequest { show_help, .. } => Self::InvalidRequest {
                diagnostics: Vec::new(),
                show_help,
            },
            Self::Cancelled => Self::Cancelled,
        }
    }

    /// Attach markers to a successful response; other variants pass through
    pub fn with_markers(self, markers: Vec<ServerMarker>) -> Self {
        match self {
            Self::Success { has_data, data, .. } => Self::Success {
                has_data,
                data,
                markers,
            },
            other => other,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The failure this response reports, `None` on success
    pub fn error(&self) -> Option<DispatchError> {
        let message = |diagnostics: &[Diagnostic]| {
            diagnostics
                .first()
                .map(|diag| diag.description.message.clone())
                .unwrap_or_default()
        };

        match self {
            Self::Success { .. } => None,
            Self::Diagnostics { diagnostics, .. } => Some(
                DiagnosticsError::new(message(diagnostics), diagnostics.clone()).into(),
            ),
            Self::InvalidRequest {
                diagnostics,
                show_help,
            } => Some(DispatchError::InvalidRequest {
                message: message(diagnostics),
                diagnostics: diagnostics.clone(),
                show_help: *show_help,
            }),
            Self::Cancelled => Some(DispatchError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticCategory, DiagnosticLocation};

    fn diag() -> Diagnostic {
        Diagnostic::new(DiagnosticCategory::ArgsInvalid, "bad", DiagnosticLocation::default())
    }

    fn marker() -> ServerMarker {
        UnfinishedMarker {
            label: "lint: a.js".into(),
            facet: "lint".into(),
            row_id: "worker 0".into(),
            start: 1,
        }
        .finish(5)
    }

    #[test]
    fn test_redact_success_keeps_has_data() {
        let res = ServerQueryResponse::success(Some(serde_json::json!([1, 2]))).redact();
        assert_eq!(
            res,
            ServerQueryResponse::Success {
                has_data: true,
                data: None,
                markers: vec![]
            }
        );

        let empty = ServerQueryResponse::success(None).redact();
        assert!(matches!(empty, ServerQueryResponse::Success { has_data: false, .. }));
    }

    #[test]
    fn test_redact_diagnostics_keeps_flag() {
        let res = ServerQueryResponse::diagnostics(vec![diag()]).redact();
        assert_eq!(
            res,
            ServerQueryResponse::Diagnostics {
                diagnostics: vec![],
                has_diagnostics: true
            }
        );
    }

    #[test]
    fn test_redact_invalid_keeps_help_flag() {
        let res = ServerQueryResponse::InvalidRequest {
            diagnostics: vec![diag()],
            show_help: true,
        }
        .redact();
        assert_eq!(
            res,
            ServerQueryResponse::InvalidRequest {
                diagnostics: vec![],
                show_help: true
            }
        );
    }

    #[test]
    fn test_markers_only_attach_to_success() {
        let res = ServerQueryResponse::success(None).with_markers(vec![marker()]);
        assert!(matches!(res, ServerQueryResponse::Success { ref markers, .. } if markers.len() == 1));

        let res = ServerQueryResponse::Cancelled.with_markers(vec![marker()]);
        assert_eq!(res, ServerQueryResponse::Cancelled);
    }

    #[test]
    fn test_error_mirrors_failed_responses() {
        assert!(ServerQueryResponse::success(None).error().is_none());

        let err = ServerQueryResponse::diagnostics(vec![diag()]).error().unwrap();
        assert!(err.to_string().starts_with("bad"));
        assert_eq!(err.exit_status(), 1);

        let err = ServerQueryResponse::InvalidRequest {
            diagnostics: vec![diag()],
            show_help: true,
        }
        .error()
        .unwrap();
        assert_eq!(err.diagnostics().map(|d| d.len()), Some(1));
        assert_eq!(err.exit_status(), 2);

        assert!(ServerQueryResponse::Cancelled.error().unwrap().is_cancelled());
    }

    #[test]
    fn test_response_wire_tag() {
        let json = serde_json::to_value(ServerQueryResponse::Cancelled).unwrap();
        assert_eq!(json["type"], "CANCELLED");
        let json = serde_json::to_value(ServerQueryResponse::success(None)).unwrap();
        assert_eq!(json["type"], "SUCCESS");
        assert_eq!(json["has_data"], false);
    }
}

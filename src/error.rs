//! Error types and exit codes for dispatch-core

use std::process::ExitCode;
use thiserror::Error;

use crate::diagnostics::{Diagnostic, DiagnosticsError};

/// Main error type for dispatch operations
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Structured, user-facing failure. Propagated unchanged.
    #[error("{0}")]
    Diagnostics(DiagnosticsError),

    /// Argument or flag validation failure
    #[error("{message}")]
    InvalidRequest {
        message: String,
        diagnostics: Vec<Diagnostic>,
        show_help: bool,
    },

    /// Control-flow signal raised at cancellation checkpoints. Never shown
    /// to a client.
    #[error("request has been cancelled")]
    Cancelled,

    #[error("Worker error: {message}")]
    Worker { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Structured diagnostics carried by this error, if any
    pub fn diagnostics(&self) -> Option<&[Diagnostic]> {
        match self {
            Self::Diagnostics(err) => Some(&err.diagnostics),
            Self::InvalidRequest { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Process exit status for the binary:
    /// - 1: diagnostics / IO error
    /// - 2: invalid request
    /// - 3: worker or internal failure
    /// - 130: cancelled
    pub fn exit_status(&self) -> u8 {
        match self {
            Self::Diagnostics(_) | Self::Io(_) => 1,
            Self::InvalidRequest { .. } => 2,
            Self::Worker { .. } | Self::Internal { .. } => 3,
            Self::Cancelled => 130,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }
}

impl From<DiagnosticsError> for DispatchError {
    fn from(err: DiagnosticsError) -> Self {
        Self::Diagnostics(err)
    }
}

/// Result type alias for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

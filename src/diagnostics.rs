//! Structured, user-facing diagnostics
//!
//! Every failure that reaches a client is expressed as a [`Diagnostic`]: a
//! category, a message, a source location and a list of advice entries.
//! Rendering them is left to the client; this module only builds them.

use serde::{Deserialize, Serialize};

/// Diagnostic categories produced by the dispatch core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCategory {
    #[serde(rename = "internalError/request")]
    InternalRequest,
    #[serde(rename = "args/fileNotFound")]
    ArgsFileNotFound,
    #[serde(rename = "args/invalid")]
    ArgsInvalid,
    #[serde(rename = "flags/invalid")]
    FlagsInvalid,
    #[serde(rename = "resolver/notFound")]
    ResolverNotFound,
    #[serde(rename = "projectManager/missing")]
    ProjectMissing,
    #[serde(rename = "dispatch/fileUnstable")]
    FileUnstable,
}

impl DiagnosticCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InternalRequest => "internalError/request",
            Self::ArgsFileNotFound => "args/fileNotFound",
            Self::ArgsInvalid => "args/invalid",
            Self::FlagsInvalid => "flags/invalid",
            Self::ResolverNotFound => "resolver/notFound",
            Self::ProjectMissing => "projectManager/missing",
            Self::FileUnstable => "dispatch/fileUnstable",
        }
    }
}

impl std::fmt::Display for DiagnosticCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Zero-based index and column, one-based line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub index: usize,
    pub line: usize,
    pub column: usize,
}

impl Position {
    /// Position on the first line of a single-line source text
    pub fn on_first_line(column: usize) -> Self {
        Self {
            index: column,
            line: 1,
            column,
        }
    }
}

/// Where a diagnostic points
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Position>,
    /// Short label rendered next to the pointed span
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
}

impl DiagnosticLocation {
    /// Location naming only a file
    pub fn file(filename: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
            ..Self::default()
        }
    }

    /// Returns a copy of this location carrying `marker`
    pub fn with_marker(&self, marker: impl Into<String>) -> Self {
        Self {
            marker: Some(marker.into()),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Info,
    Warn,
    Error,
}

/// Extra context attached to a diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DiagnosticAdvice {
    Log { category: LogCategory, text: String },
    List { list: Vec<String>, truncate: bool },
    Frame { location: DiagnosticLocation },
}

impl DiagnosticAdvice {
    pub fn info(text: impl Into<String>) -> Self {
        Self::Log {
            category: LogCategory::Info,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticDescription {
    pub category: DiagnosticCategory,
    pub message: String,
    #[serde(default)]
    pub advice: Vec<DiagnosticAdvice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub description: DiagnosticDescription,
    pub location: DiagnosticLocation,
}

impl Diagnostic {
    pub fn new(
        category: DiagnosticCategory,
        message: impl Into<String>,
        location: DiagnosticLocation,
    ) -> Self {
        Self {
            description: DiagnosticDescription {
                category,
                message: message.into(),
                advice: Vec::new(),
            },
            location,
        }
    }

    pub fn with_advice(mut self, advice: impl IntoIterator<Item = DiagnosticAdvice>) -> Self {
        self.description.advice.extend(advice);
        self
    }

    pub fn category(&self) -> DiagnosticCategory {
        self.description.category
    }
}

pub type Diagnostics = Vec<Diagnostic>;

/// An error that already carries user-facing diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsError {
    pub message: String,
    pub diagnostics: Diagnostics,
}

impl DiagnosticsError {
    pub fn new(message: impl Into<String>, diagnostics: Diagnostics) -> Self {
        Self {
            message: message.into(),
            diagnostics,
        }
    }

    /// Wraps one diagnostic, reusing its message
    pub fn single(diagnostic: Diagnostic) -> Self {
        Self {
            message: diagnostic.description.message.clone(),
            diagnostics: vec![diagnostic],
        }
    }
}

impl std::fmt::Display for DiagnosticsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        for diag in &self.diagnostics {
            write!(f, "\n  {}: {}", diag.description.category, diag.description.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for DiagnosticsError {}

/// Build an internal-error diagnostic from an arbitrary error value
pub fn derive_diagnostic_from_error(
    err: &dyn std::error::Error,
    category: DiagnosticCategory,
) -> Diagnostic {
    let mut advice = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        advice.push(DiagnosticAdvice::Log {
            category: LogCategory::Error,
            text: format!("Caused by: {}", cause),
        });
        source = cause.source();
    }

    Diagnostic::new(category, err.to_string(), DiagnosticLocation::default()).with_advice(advice)
}

/// `No files found` / `No files to <noun> found`
pub fn no_files_found_message(noun: Option<&str>) -> String {
    match noun {
        Some(noun) => format!("No files to {} found", noun),
        None => "No files found".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_serializes_to_slash_name() {
        let json = serde_json::to_string(&DiagnosticCategory::ArgsFileNotFound).unwrap();
        assert_eq!(json, "\"args/fileNotFound\"");
        assert_eq!(DiagnosticCategory::InternalRequest.to_string(), "internalError/request");
    }

    #[test]
    fn test_advice_is_tagged() {
        let advice = DiagnosticAdvice::List {
            list: vec!["a.js".to_string()],
            truncate: true,
        };
        let value = serde_json::to_value(&advice).unwrap();
        assert_eq!(value["type"], "list");
        assert_eq!(value["truncate"], true);
    }

    #[test]
    fn test_derive_diagnostic_records_causes() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let outer = crate::error::DispatchError::Io(inner);
        let diag = derive_diagnostic_from_error(&outer, DiagnosticCategory::InternalRequest);
        assert_eq!(diag.category(), DiagnosticCategory::InternalRequest);
        assert!(diag.description.message.contains("disk on fire"));
    }

    #[test]
    fn test_no_files_found_message() {
        assert_eq!(no_files_found_message(None), "No files found");
        assert_eq!(no_files_found_message(Some("lint")), "No files to lint found");
    }

    #[test]
    fn test_with_marker_keeps_span() {
        let loc = DiagnosticLocation {
            filename: Some("argv".into()),
            start: Some(Position::on_first_line(3)),
            ..Default::default()
        };
        let marked = loc.with_marker("/repo/src");
        assert_eq!(marked.start, loc.start);
        assert_eq!(marked.marker.as_deref(), Some("/repo/src"));
    }
}

//! Source locations pointing into the command line
//!
//! Argument and flag diagnostics point at the command line the user typed.
//! The command is re-serialized as `<program> <command> [--flag value]...
//! [args]...` and the targeted span is recorded on it.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::diagnostics::{DiagnosticLocation, Position};

/// Which part of the command line a diagnostic points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializeTarget {
    None,
    Arg(usize),
    /// Arguments `from..=to`. An empty or out-of-range selection points just
    /// past the end of the command line.
    ArgRange { from: usize, to: usize },
    Flag(String),
}

impl SerializeTarget {
    pub fn is_arg(&self) -> bool {
        matches!(self, Self::Arg(_) | Self::ArgRange { .. })
    }
}

/// The pieces of a command line needed to serialize it
pub struct CommandLine<'a> {
    pub program_name: &'a str,
    pub command_name: &'a str,
    pub args: &'a [String],
    /// Flags that differ from their defaults
    pub flags: &'a BTreeMap<String, Value>,
}

fn quote(value: &str) -> String {
    if value.is_empty() || value.contains(char::is_whitespace) || value.contains('"') {
        format!("{:?}", value)
    } else {
        value.to_string()
    }
}

fn flag_value(value: &Value) -> Option<String> {
    match value {
        Value::Bool(true) => None,
        Value::String(s) => Some(quote(s)),
        other => Some(other.to_string()),
    }
}

/// Serialize `line` and anchor `target` in it
pub fn serialize_cli_location(line: &CommandLine<'_>, target: &SerializeTarget) -> DiagnosticLocation {
    let mut text = String::new();
    let mut flag_spans: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    let mut arg_spans: Vec<(usize, usize)> = Vec::with_capacity(line.args.len());

    text.push_str(line.program_name);
    if !line.command_name.is_empty() {
        text.push(' ');
        text.push_str(line.command_name);
    }

    for (name, value) in line.flags {
        if matches!(value, Value::Bool(false) | Value::Null) {
            continue;
        }
        text.push(' ');
        let start = text.len();
        text.push_str("--");
        text.push_str(name);
        if let Some(rendered) = flag_value(value) {
            text.push(' ');
            text.push_str(&rendered);
        }
        flag_spans.insert(name.as_str(), (start, text.len()));
    }

    for arg in line.args {
        text.push(' ');
        let start = text.len();
        text.push_str(&quote(arg));
        arg_spans.push((start, text.len()));
    }

    let end_of_text = (text.len(), text.len());
    let span = match target {
        SerializeTarget::None => None,
        SerializeTarget::Arg(index) => Some(arg_spans.get(*index).copied().unwrap_or(end_of_text)),
        SerializeTarget::ArgRange { from, to } => {
            match (arg_spans.get(*from), arg_spans.get((*to).min(arg_spans.len().saturating_sub(1)))) {
                (Some(&(start, _)), Some(&(_, end))) if from <= to => Some((start, end)),
                _ => Some(end_of_text),
            }
        }
        SerializeTarget::Flag(name) => Some(
            flag_spans
                .get(name.as_str())
                .copied()
                .unwrap_or(end_of_text),
        ),
    };

    DiagnosticLocation {
        filename: Some("argv".to_string()),
        start: span.map(|(start, _)| Position::on_first_line(start)),
        end: span.map(|(_, end)| Position::on_first_line(end)),
        source_text: Some(text),
        marker: None,
    }
}

/// Location spanning a whole single-line string, e.g. the client cwd
pub fn whole_text_location(text: &str, filename: &str) -> DiagnosticLocation {
    DiagnosticLocation {
        filename: Some(filename.to_string()),
        source_text: Some(text.to_string()),
        start: Some(Position::on_first_line(0)),
        end: Some(Position::on_first_line(text.len())),
        marker: None,
    }
}

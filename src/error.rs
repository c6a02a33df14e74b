//! Error taxonomy for the conversion engine.
//!
//! Every failure carries the identifiers needed to report it against a
//! (language, target) pair. `SchemaViolation`s are collected, not raised one
//! at a time.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ConvertResult<T> = Result<T, ConvertError>;

/// One schema defect found in a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub rule: String,
    /// Field path inside the document, e.g. `entries[2].label`.
    pub path: String,
    /// Key of the offending entry, when it has a readable one.
    pub entry: Option<String>,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entry {
            Some(key) => write!(
                f,
                "{} ({}): expected {}, found {}",
                self.path, key, self.expected, self.actual
            ),
            None => write!(
                f,
                "{}: expected {}, found {}",
                self.path, self.expected, self.actual
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("no source definition for language `{language}`: {detail}")]
    NotFound { language: String, detail: String },

    #[error("malformed source {path}: {detail}")]
    MalformedInput { path: PathBuf, detail: String },

    #[error("source for `{language}` has {} schema violation(s): {}", violations.len(), join_violations(violations))]
    Validation {
        language: String,
        violations: Vec<SchemaViolation>,
    },

    #[error("unresolvable reference in `{language}`: {detail}")]
    Resolution { language: String, detail: String },

    #[error("cannot default field `{field}` of entry `{key}` in `{language}`: {detail}")]
    DefaultConflict {
        language: String,
        key: String,
        field: String,
        detail: String,
    },

    #[error("failed to load template {path}: {detail}")]
    TemplateLoad { path: PathBuf, detail: String },

    #[error("unknown target: {target}")]
    UnknownTarget { target: String },

    #[error("template `{target}` needs placeholder `{placeholder}` missing from entry `{key}`")]
    PlaceholderMismatch {
        target: String,
        key: String,
        placeholder: String,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration {path}: {detail}")]
    Config { path: PathBuf, detail: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn join_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Stable, serializable name for each error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    MalformedInput,
    SchemaViolation,
    Resolution,
    DefaultConflict,
    TemplateLoad,
    UnknownTarget,
    PlaceholderMismatch,
    Write,
    Config,
    Serialization,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::MalformedInput => "malformed_input",
            ErrorKind::SchemaViolation => "schema_violation",
            ErrorKind::Resolution => "resolution",
            ErrorKind::DefaultConflict => "default_conflict",
            ErrorKind::TemplateLoad => "template_load",
            ErrorKind::UnknownTarget => "unknown_target",
            ErrorKind::PlaceholderMismatch => "placeholder_mismatch",
            ErrorKind::Write => "write",
            ErrorKind::Config => "config",
            ErrorKind::Serialization => "serialization",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConvertError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::NotFound { .. } => ErrorKind::NotFound,
            ConvertError::MalformedInput { .. } => ErrorKind::MalformedInput,
            ConvertError::Validation { .. } => ErrorKind::SchemaViolation,
            ConvertError::Resolution { .. } => ErrorKind::Resolution,
            ConvertError::DefaultConflict { .. } => ErrorKind::DefaultConflict,
            ConvertError::TemplateLoad { .. } => ErrorKind::TemplateLoad,
            ConvertError::UnknownTarget { .. } => ErrorKind::UnknownTarget,
            ConvertError::PlaceholderMismatch { .. } => ErrorKind::PlaceholderMismatch,
            ConvertError::Write { .. } => ErrorKind::Write,
            ConvertError::Config { .. } => ErrorKind::Config,
            ConvertError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Global template contract failures cannot be isolated to one language.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConvertError::TemplateLoad { .. } | ConvertError::UnknownTarget { .. }
        )
    }

    pub(crate) fn template_load(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        ConvertError::TemplateLoad {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_display_names_entry() {
        let v = SchemaViolation {
            rule: "entry_fields".into(),
            path: "entries[1].label".into(),
            entry: Some("VE3".into()),
            expected: "text".into(),
            actual: "<missing>".into(),
        };
        assert_eq!(
            v.to_string(),
            "entries[1].label (VE3): expected text, found <missing>"
        );
    }

    #[test]
    fn template_errors_are_fatal() {
        assert!(ConvertError::UnknownTarget { target: "pdf".into() }.is_fatal());
        assert!(!ConvertError::Resolution {
            language: "fr".into(),
            detail: "x".into()
        }
        .is_fatal());
    }

    #[test]
    fn kind_names_are_snake_case() {
        let json = serde_json::to_string(&ErrorKind::PlaceholderMismatch).unwrap();
        assert_eq!(json, "\"placeholder_mismatch\"");
        assert_eq!(ErrorKind::SchemaViolation.as_str(), "schema_violation");
    }
}

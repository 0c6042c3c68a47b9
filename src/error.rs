//! Error types for the query compiler and schema manager.
//!
//! # Error handling strategy
//!
//! - [`CompileError`]: returned by every fallible entry point in this crate.
//!   Most variants are recoverable (the caller can retry with a different
//!   query shape or dialect); [`CompileError::CompilerInvariant`] is not — it
//!   signals a bug in this crate and should propagate, not be matched on.
//! - [`Issue`]: a non-fatal finding (schema-diff classification, profiler
//!   suggestion) accumulated alongside a successful result, mirroring how the
//!   analyzer half of this workspace reports warnings without aborting.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Severity of a non-fatal [`Issue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A byte range in a serialized source (SQL text is out of scope for this
/// crate, but query builders and schema diffs still want to point at a
/// field path or a JSON-encoded AST position).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A non-fatal finding surfaced alongside a successful operation.
#[derive(Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl Issue {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code: code.into(),
            message: message.into(),
            span: None,
        }
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.into(),
            message: message.into(),
            span: None,
        }
    }

    pub fn info(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            code: code.into(),
            message: message.into(),
            span: None,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

impl fmt::Debug for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Issue")
            .field("severity", &self.severity)
            .field("code", &self.code)
            .field("message", &self.message)
            .finish()
    }
}

/// Action required to resolve a breaking schema change, part of
/// [`CompileError::MigrationBreaking`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigrationAction {
    pub description: String,
    pub kind_name: String,
}

/// Every error this crate's public API can return.
///
/// Variants map directly onto spec §7's error kinds. `CompilerInvariant` is
/// always a bug — it is never expected to be caught by normal calling code,
/// only logged and reported.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompileError {
    /// User-supplied data fails schema, format, or cursor validation.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The query uses a construct the chosen dialect or emitter does not support.
    #[error("unsupported predicate/construct: {message}")]
    UnsupportedPredicate { message: String },

    /// Internal invariant violated; always indicates a bug in this crate.
    #[error("compiler invariant violated in {component}: {message}")]
    CompilerInvariant {
        component: &'static str,
        message: String,
    },

    /// A breaking schema change was detected while `throw_on_breaking` was set.
    #[error("migration required: {} breaking action(s)", .actions.len())]
    MigrationBreaking { actions: Vec<MigrationAction> },

    #[error("kind not found: {0}")]
    KindNotFound(String),

    #[error("edge kind not found: {0}")]
    EdgeNotFound(String),

    #[error("endpoint not found: {kind} #{id}")]
    EndpointNotFound { kind: String, id: String },

    #[error("disjoint kinds: {a} and {b} cannot both apply")]
    Disjoint { a: String, b: String },

    #[error("cardinality violation on edge kind {edge_kind}: {message}")]
    Cardinality { edge_kind: String, message: String },

    #[error("uniqueness violation on {kind}: {message}")]
    Uniqueness { kind: String, message: String },

    #[error("restricted delete: {kind} #{id} still has dependents")]
    RestrictedDelete { kind: String, id: String },

    #[error("version conflict on {kind} #{id}: expected {expected}, found {found}")]
    VersionConflict {
        kind: String,
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },
}

impl CompileError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedPredicate {
            message: message.into(),
        }
    }

    /// Builds a [`CompileError::CompilerInvariant`] tagged with the raising component.
    pub fn invariant(component: &'static str, message: impl Into<String>) -> Self {
        Self::CompilerInvariant {
            component,
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiler_invariant_carries_component() {
        let err = CompileError::invariant("standard_emitter", "plan root is not project");
        assert_eq!(
            err.to_string(),
            "compiler invariant violated in standard_emitter: plan root is not project"
        );
    }

    #[test]
    fn issue_builders_set_severity() {
        let issue = Issue::warning("LINT", "example").with_span(Span::new(0, 3));
        assert_eq!(issue.severity, Severity::Warning);
        assert_eq!(issue.span, Some(Span::new(0, 3)));
    }

    #[test]
    fn migration_breaking_message_counts_actions() {
        let err = CompileError::MigrationBreaking {
            actions: vec![
                MigrationAction {
                    description: "tighten name to required".into(),
                    kind_name: "Person".into(),
                },
                MigrationAction {
                    description: "rename email".into(),
                    kind_name: "Person".into(),
                },
            ],
        };
        assert_eq!(err.to_string(), "migration required: 2 breaking action(s)");
    }
}

use std::{borrow::Cow, path::PathBuf};

use thiserror::Error;

use crate::store::StoreError;

/// Top-level error type returned by docdrift operations.
#[derive(Debug, Error)]
pub enum DriftError {
    /// Snapshot input violates a structural invariant. Never retried.
    #[error("malformed snapshot at `{path}`: {reason}")]
    MalformedSnapshot { path: String, reason: String },

    /// A migration script is missing entry points or failed to parse.
    /// Raised before any migration in the batch runs.
    #[error("validation failed: {0}")]
    ValidationFailure(#[from] ValidationError),

    /// The storage deployment does not support multi-document transactions.
    #[error("transactions unsupported by storage: {message}")]
    TransactionCapability { message: String },

    /// Forward or backward logic failed while being applied.
    #[error("migration `{migration}` failed after {succeeded} succeeded: {message}; {remedy}")]
    ExecutionFailure {
        migration: String,
        succeeded: usize,
        message: String,
        remedy: String,
    },

    /// A record with this filename already exists with different content.
    #[error("ledger conflict for `{filename}`: {message}")]
    LedgerConflict { filename: String, message: String },

    /// Underlying storage operation failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("{message}")]
    Other { message: Cow<'static, str> },
}

impl DriftError {
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedSnapshot {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors that the executor recovers from by retrying without a session.
    pub fn is_transaction_capability(&self) -> bool {
        match self {
            DriftError::TransactionCapability { .. } => true,
            DriftError::Store(err) => err.is_transaction_capability(),
            _ => false,
        }
    }
}

/// Collection of structural issues found while validating migration scripts.
#[derive(Debug, Error)]
#[error("{}", render_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new<I>(issues: I) -> Self
    where
        I: IntoIterator<Item = ValidationIssue>,
    {
        Self {
            issues: issues.into_iter().collect(),
        }
    }

    /// Convenience helper for constructing a single-issue validation error.
    pub fn single(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new([ValidationIssue::new(field, code, message)])
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

/// A single structural problem, located by script name or logical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

fn render_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("{} [{}]: {}", issue.field, issue.code, issue.message))
        .collect::<Vec<_>>()
        .join("; ")
}

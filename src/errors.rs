//! Error taxonomy for the code intelligence engine
//!
//! Errors cross component boundaries as structured values, never as opaque
//! strings. The query layer is responsible for converting these into
//! user-facing messages with actionable suggestions.

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, CieError>;

/// Classification of relation-store failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Could not open or connect to the store
    Connect,
    /// The Datalog script failed to parse
    QueryParse,
    /// The script parsed but execution failed
    Execute,
    /// A mutating script was submitted through the read-only path
    ReadOnlyViolation,
}

/// Top-level error type for all engine components
#[derive(Debug, Error)]
pub enum CieError {
    /// Invalid argument from the caller (empty required field, malformed regex)
    #[error("invalid input: {message}")]
    Input { message: String },

    /// A source file failed to parse; partial entities are kept
    #[error("parse failure in {file_path}: {error_count} syntax error(s)")]
    Parse {
        file_path: String,
        error_count: usize,
    },

    /// Underlying relation store I/O failure
    #[error("store error ({kind:?}): {message}")]
    Store {
        kind: StoreErrorKind,
        message: String,
    },

    /// Schema mismatch, e.g. embedding dimension differs from the project's
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Embedding provider unreachable or returned an unrecognized shape
    #[error("embedding error from {provider}: {message}")]
    Embedding {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// VCS subprocess failed or the tree is not a repository
    #[error("vcs error running `{command}`: {message}")]
    Vcs { command: String, message: String },

    /// Ambient cancellation observed; partial work may have been committed
    #[error("operation canceled")]
    Canceled,
}

impl CieError {
    pub fn input(message: impl Into<String>) -> Self {
        CieError::Input {
            message: message.into(),
        }
    }

    pub fn store(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        CieError::Store {
            kind,
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        CieError::Schema {
            message: message.into(),
        }
    }

    pub fn vcs(command: impl Into<String>, message: impl Into<String>) -> Self {
        CieError::Vcs {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Whether this error should abort an ingestion run outright.
    ///
    /// Per-file parse failures and embedding failures degrade; schema and
    /// store errors do not.
    pub fn is_fatal_for_ingestion(&self) -> bool {
        matches!(self, CieError::Schema { .. } | CieError::Store { .. })
    }
}

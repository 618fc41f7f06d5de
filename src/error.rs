//! Error types for agency replay.

use crate::types::LogIndex;
use thiserror::Error;

/// Failure applying a single operation descriptor to a state tree.
///
/// Raised by the state layer, which has no notion of log positions. The
/// replay layer wraps it in [`ReplayError::Operation`] together with the
/// log index and path it happened at.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("unknown operation `{0}`")]
    UnknownOp(String),

    #[error("operation `{op}` requires field `{field}`")]
    MissingField { op: String, field: &'static str },

    #[error("operation `{op}` has an invalid `{field}` field")]
    InvalidField { op: String, field: &'static str },
}

/// Main error type for replay operations.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No snapshot available")]
    NoSnapshot,

    #[error("Index {requested} is not covered by the snapshot at {snapshot}")]
    NotCovered {
        requested: LogIndex,
        snapshot: LogIndex,
    },

    #[error("Log entry {index}: `{op}` on {path} failed: {source}")]
    Operation {
        index: LogIndex,
        path: String,
        op: String,
        #[source]
        source: OperationError,
    },

    #[error("No log entry with index {0}")]
    UnknownIndex(LogIndex),

    #[error("Log is not ordered: {next} follows {previous}")]
    UnorderedLog { previous: LogIndex, next: LogIndex },

    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<serde_json::Error> for ReplayError {
    fn from(e: serde_json::Error) -> Self {
        ReplayError::Serialization(e.to_string())
    }
}

/// Result type for replay operations.
pub type Result<T> = std::result::Result<T, ReplayError>;

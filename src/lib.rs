//! # Agency Replay
//!
//! Time travel over a replicated agency log: reconstruct the key/value tree
//! as it stood after any log entry.
//!
//! ## Core Concepts
//!
//! - **Log**: index-ordered entries, each a map from path to operation
//! - **State**: a persistent tree; clones share structure
//! - **Checkpoints**: materialized trees cached by index, so nearby queries
//!   replay only a few entries
//! - **Diffs**: line diffs of a value before and after one entry
//!
//! ## Example
//!
//! ```ignore
//! use agency_replay::{LogIndex, LogSource, ReplayConfig, ReplayCoordinator};
//! use std::sync::Arc;
//!
//! let source = Arc::new(LogSource::from_json(serde_json::from_str(&dump)?)?);
//! let mut coordinator = ReplayCoordinator::new(source, ReplayConfig::default());
//!
//! coordinator.update_index(LogIndex(1234))?;
//! let plan = coordinator.get("/arango/Plan");
//!
//! let diff = coordinator.diff_entry(LogIndex(1234), "/arango/Plan")?;
//! ```

pub mod cache;
pub mod diff;
pub mod error;
pub mod replay;
pub mod source;
pub mod state;
pub mod trie;
pub mod types;

// Re-exports
pub use cache::{CacheStats, SnapshotCache};
pub use diff::{diff_json, diff_lines, diff_values, patch, DiffLine, JsonDiff};
pub use error::{OperationError, ReplayError, Result};
pub use replay::{
    Materialized, NoProgress, ProgressSink, ReplayConfig, ReplayCoordinator, ReplayWorker,
    UpdateStatus, WorkerEvent,
};
pub use source::LogSource;
pub use state::{apply_entry, Completion, Path, StateTree, Value};
pub use trie::PathTrie;
pub use types::*;

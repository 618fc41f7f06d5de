//! The agency state tree and the rules for applying log entries to it.
//!
//! A [`StateTree`] is a persistent JSON-like tree: clones share structure,
//! so checkpoints are cheap. [`apply_entry`] replays one log entry against a
//! tree, deterministically, using only the entry's own timestamp as a clock.

mod operations;
mod path;
mod tree;
mod ttl;
mod value;

pub use operations::{apply_entry, apply_operation, Descriptor, Operation};
pub use path::Path;
pub use tree::{render_lines, Completion, StateTree};
pub use ttl::TtlTable;
pub use value::{Object, Value};

//! Bounded cache of materialized states.
//!
//! Checkpoints are keyed by log index and ordered, so the nearest
//! checkpoint at or below a target can be found without scanning.

mod snapshot_cache;

pub use snapshot_cache::{CacheStats, SnapshotCache};

//! Materializing agency state at arbitrary log indexes.
//!
//! [`ReplayCoordinator`] picks the cheapest starting point for a target
//! (cache hit, the state it served last, the nearest checkpoint, or the
//! snapshot) and replays forward, leaving checkpoints behind.
//! [`ReplayWorker`] runs a coordinator on a background thread.

mod coordinator;
mod progress;
mod worker;

pub use coordinator::{ReplayConfig, ReplayCoordinator, UpdateStatus};
pub use progress::{NoProgress, ProgressSink};
pub use worker::{Materialized, ReplayWorker, WorkerEvent};

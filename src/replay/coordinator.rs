//! Replay coordinator: turns "state at index N" into cache lookups plus the
//! shortest forward replay.

use super::progress::{NoProgress, ProgressSink};
use crate::cache::SnapshotCache;
use crate::diff::{diff_lines, DiffLine};
use crate::error::{ReplayError, Result};
use crate::source::LogSource;
use crate::state::{apply_entry, Path, StateTree, Value};
use crate::types::LogIndex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Replay tuning.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Number of checkpoints the cache keeps.
    pub cache_capacity: usize,

    /// Entries between unconditional checkpoints.
    pub coarse_stride: u64,

    /// Smallest checkpoint stride used close to the target.
    pub min_stride: u64,

    /// Factor by which the stride shrinks each time the remaining distance
    /// drops below it.
    pub stride_divisor: u64,

    /// Upper bound on the time between progress reports.
    pub progress_interval_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 256,
            coarse_stride: 1000,
            min_stride: 10,
            stride_divisor: 10,
            progress_interval_ms: 100,
        }
    }
}

impl ReplayConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Checkpoint stride for a replay that still has `remaining` entries to
    /// go: the coarse stride far away, shrinking towards `min_stride` as the
    /// target gets closer.
    pub fn checkpoint_stride(&self, remaining: u64) -> u64 {
        let coarse = self.coarse_stride.max(1);
        let min = self.min_stride.clamp(1, coarse);
        let divisor = self.stride_divisor.max(2);

        let mut stride = coarse;
        while stride > min && remaining <= stride {
            stride = (stride / divisor).max(min);
        }
        stride
    }

    /// Whether to checkpoint once `applied` entries are in and `remaining`
    /// are left: on every coarse stride, and on the finer stride near the
    /// target. The target itself is cached separately.
    pub fn is_checkpoint(&self, applied: u64, remaining: u64) -> bool {
        remaining > 0
            && (applied % self.coarse_stride.max(1) == 0
                || applied % self.checkpoint_stride(remaining) == 0)
    }
}

/// Outcome of [`ReplayCoordinator::update_index`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The log does not start at genesis and there is no snapshot.
    NoSnapshotAvailable,
    /// The target lies before the snapshot.
    NotCoveredBySnapshot,
    /// A new state was materialized.
    Updated,
    /// The target resolves to the state already served.
    Unchanged,
}

/// Where replay for a target may start from when nothing better is cached.
#[derive(Clone, Copy, Debug)]
enum Origin {
    Genesis,
    Snapshot { applied: usize },
}

/// A target mapped onto the log.
#[derive(Clone, Copy, Debug)]
struct Resolved {
    /// Index the resulting state is keyed under.
    index: LogIndex,
    /// Entries applied in the resulting state.
    applied: usize,
    origin: Origin,
}

/// A materialized state.
#[derive(Clone, Debug)]
struct Served {
    index: LogIndex,
    applied: usize,
    tree: StateTree,
}

/// Serves the agency state at arbitrary log indexes.
///
/// Owns the most recently served tree and shares a [`SnapshotCache`] of
/// checkpoints, which other threads may read concurrently.
pub struct ReplayCoordinator {
    source: Arc<LogSource>,
    cache: Arc<SnapshotCache>,
    config: ReplayConfig,
    current: Option<Served>,
}

impl ReplayCoordinator {
    /// Create a coordinator with its own cache.
    pub fn new(source: Arc<LogSource>, config: ReplayConfig) -> Self {
        let cache = Arc::new(SnapshotCache::new(config.cache_capacity));
        Self::with_cache(source, cache, config)
    }

    /// Create a coordinator that checkpoints into an existing cache.
    pub fn with_cache(
        source: Arc<LogSource>,
        cache: Arc<SnapshotCache>,
        config: ReplayConfig,
    ) -> Self {
        if let Some(snapshot) = source.snapshot() {
            cache.put(snapshot.index, StateTree::from_value(snapshot.root.clone()));
        }
        Self {
            source,
            cache,
            config,
            current: None,
        }
    }

    pub fn source(&self) -> &Arc<LogSource> {
        &self.source
    }

    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// The most recently served state.
    pub fn current(&self) -> Option<&StateTree> {
        self.current.as_ref().map(|s| &s.tree)
    }

    /// Index of the most recently served state.
    pub fn current_index(&self) -> Option<LogIndex> {
        self.current.as_ref().map(|s| s.index)
    }

    /// Read a value from the most recently served state.
    pub fn get(&self, path: &str) -> Option<Value> {
        self.current()?.get(&Path::parse(path))
    }

    /// Borrow a value from the most recently served state.
    pub fn get_ref(&self, path: &str) -> Option<&Value> {
        self.current()?.get_ref(&Path::parse(path))
    }

    /// Materialize the state at `target` and make it current.
    pub fn update_index(&mut self, target: LogIndex) -> Result<UpdateStatus> {
        self.update_index_with_progress(target, &mut NoProgress)
    }

    /// Like [`update_index`], reporting progress while replaying.
    ///
    /// On error the previously served state stays current and the cache
    /// keeps every checkpoint written before the failing entry.
    ///
    /// [`update_index`]: ReplayCoordinator::update_index
    pub fn update_index_with_progress(
        &mut self,
        target: LogIndex,
        progress: &mut dyn ProgressSink,
    ) -> Result<UpdateStatus> {
        let resolved = match self.resolve(target) {
            Ok(resolved) => resolved,
            Err(ReplayError::NoSnapshot) => return Ok(UpdateStatus::NoSnapshotAvailable),
            Err(ReplayError::NotCovered { .. }) => return Ok(UpdateStatus::NotCoveredBySnapshot),
            Err(e) => return Err(e),
        };

        if self.current_index() == Some(resolved.index) {
            return Ok(UpdateStatus::Unchanged);
        }

        let tree = self.materialize(resolved, progress)?;
        self.current = Some(Served {
            index: resolved.index,
            applied: resolved.applied,
            tree,
        });
        Ok(UpdateStatus::Updated)
    }

    /// Materialize the state at `target` without changing the current one.
    pub fn state_at(&self, target: LogIndex) -> Result<StateTree> {
        let resolved = self.resolve(target)?;
        if let Some(current) = &self.current {
            if current.index == resolved.index {
                return Ok(current.tree.clone());
            }
        }
        self.materialize(resolved, &mut NoProgress)
    }

    /// Diff the value at `path` just before and just after the entry at
    /// `index`.
    pub fn diff_entry(&self, index: LogIndex, path: &str) -> Result<Vec<DiffLine>> {
        self.source
            .position_of(index)
            .ok_or(ReplayError::UnknownIndex(index))?;
        let path = Path::parse(path);

        let before = match index.0.checked_sub(1) {
            Some(prev) => self.state_at(LogIndex(prev))?,
            None => StateTree::new(),
        };
        let after = self.state_at(index)?;

        Ok(diff_lines(&before.lines(&path)?, &after.lines(&path)?))
    }

    /// Map a target onto the log and decide where replay could start.
    fn resolve(&self, target: LogIndex) -> Result<Resolved> {
        let applied = self.source.applied_through(target);

        if let Some(snapshot) = self.source.snapshot() {
            let base = self.source.applied_through(snapshot.index);
            if applied > base {
                return Ok(Resolved {
                    index: self.source.entries()[applied - 1].index,
                    applied,
                    origin: Origin::Snapshot { applied: base },
                });
            }
            if target >= snapshot.index {
                return Ok(Resolved {
                    index: snapshot.index,
                    applied: base,
                    origin: Origin::Snapshot { applied: base },
                });
            }
            if !self.source.starts_at_genesis() {
                return Err(ReplayError::NotCovered {
                    requested: target,
                    snapshot: snapshot.index,
                });
            }
        }

        if self.source.starts_at_genesis() {
            // The genesis entry has index 0, so every target covers it.
            return Ok(Resolved {
                index: self.source.entries()[applied - 1].index,
                applied,
                origin: Origin::Genesis,
            });
        }

        Err(ReplayError::NoSnapshot)
    }

    /// Pick the cheapest starting point and replay forward to `resolved`.
    fn materialize(
        &self,
        resolved: Resolved,
        progress: &mut dyn ProgressSink,
    ) -> Result<StateTree> {
        if let Some(tree) = self.cache.get(resolved.index) {
            trace!(index = %resolved.index, "served from cache");
            return Ok(tree);
        }

        let (start, mut tree) = self.starting_point(resolved);
        let entries = &self.source.entries()[start..resolved.applied];
        let total = entries.len();
        debug!(index = %resolved.index, from = start, entries = total, "replaying");

        let coarse = self.config.coarse_stride.max(1) as usize;
        let interval = self.config.progress_interval();
        let mut last_report = Instant::now();

        for (offset, entry) in entries.iter().enumerate() {
            if let Err(e) = apply_entry(&mut tree, entry) {
                warn!(index = %entry.index, error = %e, "replay failed");
                return Err(e);
            }

            let done = offset + 1;
            let applied = start + done;
            let remaining = (total - done) as u64;
            if self.config.is_checkpoint(applied as u64, remaining) {
                trace!(index = %entry.index, "checkpoint");
                self.cache.put(entry.index, tree.clone());
            }

            if done % coarse == 0 || last_report.elapsed() >= interval {
                progress.report(done as f64 / total as f64, "replaying");
                last_report = Instant::now();
            }
        }

        self.cache.put(resolved.index, tree.clone());
        debug!(index = %resolved.index, "replay finished");
        Ok(tree)
    }

    /// Most specific valid start: the served state if the target lies ahead
    /// of it, the nearest checkpoint, or the origin. Returns the number of
    /// entries already applied and the tree to continue from.
    fn starting_point(&self, resolved: Resolved) -> (usize, StateTree) {
        let (origin_applied, origin_tree) = match resolved.origin {
            Origin::Genesis => (0, None),
            Origin::Snapshot { applied } => (applied, self.source.snapshot()),
        };
        let usable = |applied: usize| applied >= origin_applied && applied <= resolved.applied;

        let continued = self
            .current
            .as_ref()
            .filter(|s| s.index < resolved.index && usable(s.applied))
            .map(|s| (s.applied, s.tree.clone()));

        let cached = self
            .cache
            .closest(resolved.index)
            .map(|(index, tree)| (self.source.applied_through(index), tree))
            .filter(|(applied, _)| usable(*applied));

        match (continued, cached) {
            (Some(c), Some(k)) if k.0 > c.0 => k,
            (Some(c), _) => c,
            (None, Some(k)) => k,
            (None, None) => match origin_tree {
                Some(snapshot) => (
                    origin_applied,
                    StateTree::from_value(snapshot.root.clone()),
                ),
                None => (origin_applied, StateTree::new()),
            },
        }
    }
}

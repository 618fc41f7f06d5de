//! Snapshot cache implementation.

use crate::state::StateTree;
use crate::types::LogIndex;
use lru::LruCache;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use tracing::debug;

/// Counters describing cache effectiveness.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CacheInner {
    /// Recency order and the trees themselves.
    lru: LruCache<LogIndex, StateTree>,
    /// The same keys in index order, for nearest-below lookups.
    order: BTreeSet<LogIndex>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Bounded map from log index to the state after that entry.
///
/// Trees are stored frozen: callers receive clones, which share structure
/// with the cached copy and copy on write. Lookups that do not affect
/// recency take a shared lock, so readers can inspect checkpoints while a
/// replay inserts new ones.
pub struct SnapshotCache {
    inner: RwLock<CacheInner>,
}

impl SnapshotCache {
    /// Create a cache holding at most `capacity` trees (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: RwLock::new(CacheInner {
                lru: LruCache::new(capacity),
                order: BTreeSet::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    /// Exact lookup. Marks the entry as most recently used.
    pub fn get(&self, index: LogIndex) -> Option<StateTree> {
        let mut inner = self.inner.write();
        match inner.lru.get(&index).cloned() {
            Some(tree) => {
                inner.hits += 1;
                Some(tree)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Exact lookup without touching recency.
    pub fn peek(&self, index: LogIndex) -> Option<StateTree> {
        self.inner.read().lru.peek(&index).cloned()
    }

    /// The entry with the largest index `<= index`.
    pub fn closest(&self, index: LogIndex) -> Option<(LogIndex, StateTree)> {
        let inner = self.inner.read();
        let found = *inner.order.range(..=index).next_back()?;
        inner.lru.peek(&found).map(|tree| (found, tree.clone()))
    }

    /// Insert or overwrite an entry, evicting the least recently used one if
    /// the cache is full.
    pub fn put(&self, index: LogIndex, tree: StateTree) {
        let mut inner = self.inner.write();
        if let Some((evicted, _)) = inner.lru.push(index, tree) {
            if evicted != index {
                inner.order.remove(&evicted);
                inner.evictions += 1;
                debug!(%evicted, inserted = %index, "evicted cached state");
            }
        }
        inner.order.insert(index);
    }

    pub fn contains(&self, index: LogIndex) -> bool {
        self.inner.read().lru.contains(&index)
    }

    /// Cached indexes in ascending order.
    pub fn indexes(&self) -> Vec<LogIndex> {
        self.inner.read().order.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().lru.cap().get()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.lru.clear();
        inner.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read();
        CacheStats {
            entries: inner.lru.len(),
            capacity: inner.lru.cap().get(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}

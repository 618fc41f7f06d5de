//! Time-to-live bookkeeping.

use crate::types::Timestamp;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Pending expiries, keyed by normalized path.
///
/// The heap may hold superseded records; a record is live only while it
/// matches the expiry stored in `active` for its path. That keeps at most one
/// live record per path without searching the heap on overwrite.
#[derive(Clone, Debug, Default)]
pub struct TtlTable {
    heap: BinaryHeap<Reverse<(Timestamp, String)>>,
    active: HashMap<String, Timestamp>,
}

impl TtlTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an expiry for a path, replacing any earlier one.
    pub fn register(&mut self, path: String, expires: Timestamp) {
        self.active.insert(path.clone(), expires);
        self.heap.push(Reverse((expires, path)));
    }

    /// Forget the expiry for a path, if any.
    pub fn clear(&mut self, path: &str) {
        self.active.remove(path);
    }

    /// Current expiry for a path.
    pub fn expiry(&self, path: &str) -> Option<Timestamp> {
        self.active.get(path).copied()
    }

    /// Remove and return every live path expiring strictly before `now`, in
    /// expiry order.
    pub fn drain_expired(&mut self, now: Timestamp) -> Vec<String> {
        let mut expired = Vec::new();
        while let Some(Reverse((at, _))) = self.heap.peek() {
            if *at >= now {
                break;
            }
            let Some(Reverse((at, path))) = self.heap.pop() else {
                break;
            };
            if self.active.get(&path) == Some(&at) {
                self.active.remove(&path);
                expired.push(path);
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

impl PartialEq for TtlTable {
    /// Two tables are equal when they would expire the same paths at the
    /// same instants; stale heap records do not matter.
    fn eq(&self, other: &Self) -> bool {
        self.active == other.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_in_order() {
        let mut ttl = TtlTable::new();
        ttl.register("/b".into(), Timestamp(20));
        ttl.register("/a".into(), Timestamp(10));
        ttl.register("/c".into(), Timestamp(30));

        assert_eq!(ttl.drain_expired(Timestamp(25)), vec!["/a", "/b"]);
        assert_eq!(ttl.len(), 1);
    }

    #[test]
    fn test_expiry_is_strict() {
        let mut ttl = TtlTable::new();
        ttl.register("/a".into(), Timestamp(10));
        assert!(ttl.drain_expired(Timestamp(10)).is_empty());
        assert_eq!(ttl.drain_expired(Timestamp(11)), vec!["/a"]);
    }

    #[test]
    fn test_reregister_replaces() {
        let mut ttl = TtlTable::new();
        ttl.register("/a".into(), Timestamp(10));
        ttl.register("/a".into(), Timestamp(50));

        assert!(ttl.drain_expired(Timestamp(20)).is_empty());
        assert_eq!(ttl.expiry("/a"), Some(Timestamp(50)));
        assert_eq!(ttl.drain_expired(Timestamp(60)), vec!["/a"]);
        assert!(ttl.is_empty());
    }

    #[test]
    fn test_clear_cancels() {
        let mut ttl = TtlTable::new();
        ttl.register("/a".into(), Timestamp(10));
        ttl.clear("/a");
        assert!(ttl.drain_expired(Timestamp(100)).is_empty());
    }
}

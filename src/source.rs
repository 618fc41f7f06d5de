//! The ordered agency log and its optional base snapshot.
//!
//! Reading files or talking to a cluster is left to the caller; this module
//! interprets documents that have already been parsed into JSON. Three
//! shapes are understood:
//!
//! - a bare array of log entries,
//! - a query result `{"result": [...]}`,
//! - an agency dump `{"log": [...], "compaction": {...}}`, whose compaction
//!   is the snapshot.

use crate::error::{ReplayError, Result};
use crate::state::Value;
use crate::types::{LogEntry, LogIndex, Snapshot};
use regex::Regex;
use tracing::{debug, warn};

/// An index-ordered log plus the snapshot replay may start from.
#[derive(Clone, Debug, Default)]
pub struct LogSource {
    entries: Vec<LogEntry>,
    snapshot: Option<Snapshot>,
}

impl LogSource {
    /// Wrap entries that are already in strictly increasing index order.
    pub fn new(entries: Vec<LogEntry>, snapshot: Option<Snapshot>) -> Result<Self> {
        for pair in entries.windows(2) {
            if pair[1].index <= pair[0].index {
                return Err(ReplayError::UnorderedLog {
                    previous: pair[0].index,
                    next: pair[1].index,
                });
            }
        }
        Ok(Self { entries, snapshot })
    }

    /// Interpret a parsed log document, sorting its entries by index.
    pub fn from_json(document: serde_json::Value) -> Result<Self> {
        Self::from_parts(document, None)
    }

    /// Interpret a parsed log document plus a separately loaded snapshot.
    ///
    /// A snapshot embedded in an agency dump wins over the separate one.
    pub fn from_parts(
        document: serde_json::Value,
        snapshot: Option<serde_json::Value>,
    ) -> Result<Self> {
        let (log, embedded) = match document {
            serde_json::Value::Array(_) => (document, None),
            serde_json::Value::Object(mut map) => {
                if let Some(result) = map.remove("result") {
                    debug!("interpreting object as query result");
                    (result, None)
                } else if let Some(log) = map.remove("log") {
                    debug!("interpreting object as agency dump");
                    (log, map.remove("compaction").filter(|c| !c.is_null()))
                } else {
                    return Err(ReplayError::InvalidFormat(
                        "expected `result` or `log` member".into(),
                    ));
                }
            }
            _ => {
                return Err(ReplayError::InvalidFormat(
                    "expected an array or an object".into(),
                ))
            }
        };

        let mut entries: Vec<LogEntry> = serde_json::from_value(log)
            .map_err(|e| ReplayError::Deserialization(e.to_string()))?;
        entries.sort_by_key(|e| e.index);
        if let Some(pair) = entries.windows(2).find(|p| p[0].index == p[1].index) {
            return Err(ReplayError::InvalidFormat(format!(
                "duplicate log index {}",
                pair[0].index
            )));
        }

        let snapshot = match (embedded, snapshot) {
            (Some(embedded), separate) => {
                if separate.is_some() {
                    warn!("ignoring separate snapshot, dump carries its own");
                }
                Some(parse_snapshot(embedded)?)
            }
            (None, Some(separate)) => Some(parse_snapshot(separate)?),
            (None, None) => None,
        };

        Ok(Self { entries, snapshot })
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first_index(&self) -> Option<LogIndex> {
        self.entries.first().map(|e| e.index)
    }

    pub fn last_index(&self) -> Option<LogIndex> {
        self.entries.last().map(|e| e.index)
    }

    /// Whether the log starts at the genesis index, so replay may start from
    /// an empty tree.
    pub fn starts_at_genesis(&self) -> bool {
        self.first_index().map_or(false, |i| i.is_genesis())
    }

    /// Position of the entry with exactly this index.
    pub fn position_of(&self, index: LogIndex) -> Option<usize> {
        self.entries.binary_search_by_key(&index, |e| e.index).ok()
    }

    /// Number of entries with an index `<= index`; replaying that many
    /// entries yields the state at `index`.
    pub fn applied_through(&self, index: LogIndex) -> usize {
        self.entries.partition_point(|e| e.index <= index)
    }

    /// Position of the last entry at or before the snapshot, the first entry
    /// a viewer can show state for. When the snapshot precedes every entry
    /// that is the first entry.
    pub fn first_valid_position(&self) -> Option<usize> {
        match &self.snapshot {
            Some(_) if self.entries.is_empty() => None,
            Some(snapshot) => Some(self.applied_through(snapshot.index).saturating_sub(1)),
            None if self.starts_at_genesis() => Some(0),
            None => None,
        }
    }

    /// Positions of entries that touch at least one path matching `pattern`.
    pub fn positions_matching_path(&self, pattern: &Regex) -> Vec<usize> {
        let positions: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.request.keys().any(|path| pattern.is_match(path)))
            .map(|(position, _)| position)
            .collect();
        debug!(pattern = %pattern, matched = positions.len(), "filtered log by path");
        positions
    }

    /// Positions of entries whose JSON text contains `needle`. An empty
    /// needle selects every entry.
    pub fn positions_containing(&self, needle: &str) -> Result<Vec<usize>> {
        if needle.is_empty() {
            return Ok((0..self.entries.len()).collect());
        }
        let mut positions = Vec::new();
        for (position, entry) in self.entries.iter().enumerate() {
            if serde_json::to_string(entry)?.contains(needle) {
                positions.push(position);
            }
        }
        debug!(matched = positions.len(), "filtered log by text");
        Ok(positions)
    }
}

/// Parse an agency compaction document: `{"_key": ..., "readDB": [root]}`.
fn parse_snapshot(document: serde_json::Value) -> Result<Snapshot> {
    let serde_json::Value::Object(mut map) = document else {
        return Err(ReplayError::InvalidFormat(
            "snapshot must be an object".into(),
        ));
    };

    let index: LogIndex = map
        .remove("_key")
        .ok_or_else(|| ReplayError::InvalidFormat("snapshot without `_key`".into()))
        .and_then(|key| {
            serde_json::from_value(key).map_err(|e| ReplayError::Deserialization(e.to_string()))
        })?;

    let root = match map.remove("readDB") {
        Some(serde_json::Value::Array(mut items)) if !items.is_empty() => items.swap_remove(0),
        Some(root @ serde_json::Value::Object(_)) => root,
        _ => {
            return Err(ReplayError::InvalidFormat(
                "snapshot without `readDB` root".into(),
            ))
        }
    };

    Ok(Snapshot::new(index, Value::from(root)))
}

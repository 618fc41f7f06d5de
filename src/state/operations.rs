//! Agency operation application.

use super::path::Path;
use super::tree::StateTree;
use super::value::Value;
use crate::error::{OperationError, ReplayError, Result};
use crate::types::LogEntry;
use serde_json::Number;

/// One parsed operation, without the path it applies to.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    Set(Value),
    Delete,
    Increment(Number),
    Decrement(Number),
    /// Append at the tail.
    Push(Value),
    /// Append at the tail, then keep at most `len` items by dropping from the head.
    PushQueue { new: Value, len: usize },
    /// Remove the tail.
    Pop,
    /// Remove the head.
    Shift,
    /// Insert at the head.
    Prepend(Value),
    Erase(Value),
    Replace { val: Value, new: Value },
    ReadLock(Value),
    ReadUnlock(Value),
    WriteLock(Value),
    WriteUnlock(Value),
    Observe,
    Unobserve,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Set(_) => "set",
            Operation::Delete => "delete",
            Operation::Increment(_) => "increment",
            Operation::Decrement(_) => "decrement",
            Operation::Push(_) => "push",
            Operation::PushQueue { .. } => "push-queue",
            Operation::Pop => "pop",
            Operation::Shift => "shift",
            Operation::Prepend(_) => "prepend",
            Operation::Erase(_) => "erase",
            Operation::Replace { .. } => "replace",
            Operation::ReadLock(_) => "read-lock",
            Operation::ReadUnlock(_) => "read-unlock",
            Operation::WriteLock(_) => "write-lock",
            Operation::WriteUnlock(_) => "write-unlock",
            Operation::Observe => "observe",
            Operation::Unobserve => "unobserve",
        }
    }

    /// Whether the operation writes to its path (and so resets its TTL).
    pub fn is_write(&self) -> bool {
        !matches!(self, Operation::Observe | Operation::Unobserve)
    }
}

/// An operation plus the optional time-to-live (seconds) attached to it.
#[derive(Clone, Debug, PartialEq)]
pub struct Descriptor {
    pub operation: Operation,
    pub ttl: Option<f64>,
}

impl Descriptor {
    /// Parse a request value.
    ///
    /// Anything that is not an object with an `op` or `new` member is a
    /// literal and is written verbatim.
    pub fn parse(raw: &serde_json::Value) -> std::result::Result<Self, OperationError> {
        let fields = match raw {
            serde_json::Value::Object(map) if map.contains_key("op") || map.contains_key("new") => {
                map
            }
            _ => {
                return Ok(Self {
                    operation: Operation::Set(Value::from(raw)),
                    ttl: None,
                })
            }
        };

        let op = match fields.get("op") {
            None => "set",
            Some(serde_json::Value::String(op)) => op.as_str(),
            Some(_) => {
                return Err(OperationError::InvalidField {
                    op: "set".into(),
                    field: "op",
                })
            }
        };

        let require = |field: &'static str| {
            fields
                .get(field)
                .map(Value::from)
                .ok_or_else(|| OperationError::MissingField {
                    op: op.to_string(),
                    field,
                })
        };
        let step = || match fields.get("step").or_else(|| fields.get("new")) {
            None => Ok(Number::from(1)),
            Some(serde_json::Value::Number(n)) => Ok(n.clone()),
            Some(_) => Err(OperationError::InvalidField {
                op: op.to_string(),
                field: "step",
            }),
        };

        let operation = match op {
            "set" => Operation::Set(require("new")?),
            "delete" => Operation::Delete,
            "increment" => Operation::Increment(step()?),
            "decrement" => Operation::Decrement(step()?),
            "push" => Operation::Push(require("new")?),
            "push-queue" => {
                let len = fields
                    .get("len")
                    .ok_or_else(|| OperationError::MissingField {
                        op: op.to_string(),
                        field: "len",
                    })?
                    .as_u64()
                    .and_then(|len| usize::try_from(len).ok())
                    .ok_or_else(|| OperationError::InvalidField {
                        op: op.to_string(),
                        field: "len",
                    })?;
                Operation::PushQueue {
                    new: require("new")?,
                    len,
                }
            }
            "pop" => Operation::Pop,
            "shift" => Operation::Shift,
            "prepend" => Operation::Prepend(require("new")?),
            "erase" => Operation::Erase(require("val")?),
            "replace" => Operation::Replace {
                val: require("val")?,
                new: require("new")?,
            },
            "read-lock" => Operation::ReadLock(require("by")?),
            "read-unlock" => Operation::ReadUnlock(require("by")?),
            "write-lock" => Operation::WriteLock(require("by")?),
            "write-unlock" => Operation::WriteUnlock(require("by")?),
            "observe" => Operation::Observe,
            "unobserve" => Operation::Unobserve,
            other => return Err(OperationError::UnknownOp(other.to_string())),
        };

        let ttl = match fields.get("ttl") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            Some(_) => {
                return Err(OperationError::InvalidField {
                    op: op.to_string(),
                    field: "ttl",
                })
            }
        };

        Ok(Self { operation, ttl })
    }
}

/// Apply one operation at a path.
pub fn apply_operation(tree: &mut StateTree, path: &Path, operation: &Operation) {
    match operation {
        Operation::Set(value) => tree.set(path, value.clone()),

        Operation::Delete => tree.delete(path),

        Operation::Increment(step) => add(tree, path, step, false),

        Operation::Decrement(step) => add(tree, path, step, true),

        Operation::Push(new) => tree.slot_mut(path).coerce_array().push(new.clone()),

        Operation::PushQueue { new, len } => {
            let items = tree.slot_mut(path).coerce_array();
            items.push(new.clone());
            if items.len() > *len {
                let excess = items.len() - len;
                items.drain(..excess);
            }
        }

        Operation::Pop => {
            if let Some(items) = existing_array(tree, path) {
                items.pop();
            }
        }

        Operation::Shift => {
            if let Some(items) = existing_array(tree, path) {
                if !items.is_empty() {
                    items.remove(0);
                }
            }
        }

        Operation::Prepend(new) => tree.slot_mut(path).coerce_array().insert(0, new.clone()),

        Operation::Erase(val) => {
            if let Some(items) = existing_array(tree, path) {
                if let Some(pos) = items.iter().position(|item| item == val) {
                    items.remove(pos);
                }
            }
        }

        Operation::Replace { val, new } => {
            if let Some(items) = existing_array(tree, path) {
                if let Some(item) = items.iter_mut().find(|item| *item == val) {
                    *item = new.clone();
                }
            }
        }

        Operation::ReadLock(by) => tree.slot_mut(path).coerce_array().push(by.clone()),

        Operation::ReadUnlock(by) => {
            let Some(items) = existing_array(tree, path) else {
                return;
            };
            if let Some(pos) = items.iter().position(|item| item == by) {
                items.remove(pos);
            }
            if items.is_empty() {
                tree.delete(path);
            }
        }

        Operation::WriteLock(by) => tree.set(path, by.clone()),

        Operation::WriteUnlock(_) => tree.delete(path),

        Operation::Observe | Operation::Unobserve => {}
    }
}

/// Apply every operation of a log entry, expiring TTLs first.
///
/// The entry's own timestamp is the only clock: paths whose expiry lies
/// strictly before it are deleted, and new TTLs are counted from it. On
/// error the tree may be partially updated and must be discarded.
pub fn apply_entry(tree: &mut StateTree, entry: &LogEntry) -> Result<()> {
    if let Some(now) = entry.timestamp {
        for expired in tree.ttl_mut().drain_expired(now) {
            tree.delete(&Path::parse(&expired));
        }
    }

    for (key, raw) in &entry.request {
        let path = Path::parse(key);
        let descriptor = Descriptor::parse(raw).map_err(|source| ReplayError::Operation {
            index: entry.index,
            path: path.normalized(),
            op: op_name(raw),
            source,
        })?;

        apply_operation(tree, &path, &descriptor.operation);

        if descriptor.operation.is_write() {
            let normalized = path.normalized();
            tree.ttl_mut().clear(&normalized);
            if let (Some(ttl), Some(now)) = (descriptor.ttl, entry.timestamp) {
                tree.ttl_mut().register(normalized, now.plus_secs(ttl));
            }
        }
    }

    Ok(())
}

fn op_name(raw: &serde_json::Value) -> String {
    match raw.get("op") {
        Some(serde_json::Value::String(op)) => op.clone(),
        Some(other) => other.to_string(),
        None => "set".to_string(),
    }
}

fn existing_array<'a>(tree: &'a mut StateTree, path: &Path) -> Option<&'a mut Vec<Value>> {
    tree.existing_mut(path).and_then(Value::as_array_mut)
}

fn add(tree: &mut StateTree, path: &Path, step: &Number, negate: bool) {
    let slot = tree.slot_mut(path);
    let current = slot.as_number().cloned().unwrap_or_else(|| Number::from(0));
    *slot = match (current.as_i64(), step.as_i64()) {
        (Some(a), Some(b)) => {
            let sum = if negate { a.checked_sub(b) } else { a.checked_add(b) };
            match sum {
                Some(n) => Value::Number(Number::from(n)),
                None => float_sum(&current, step, negate),
            }
        }
        _ => float_sum(&current, step, negate),
    };
}

fn float_sum(a: &Number, b: &Number, negate: bool) -> Value {
    let a = a.as_f64().unwrap_or(0.0);
    let b = b.as_f64().unwrap_or(0.0);
    let sum = if negate { a - b } else { a + b };
    Number::from_f64(sum).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LogIndex, Timestamp};
    use serde_json::json;

    fn run(start: serde_json::Value, path: &str, op: serde_json::Value) -> StateTree {
        let mut tree = StateTree::from_value(start);
        let descriptor = Descriptor::parse(&op).unwrap();
        apply_operation(&mut tree, &Path::parse(path), &descriptor.operation);
        tree
    }

    #[test]
    fn test_literal_set() {
        let tree = run(json!({}), "/a/b", json!({"x": 1}));
        assert_eq!(tree.root(), &json!({"a": {"b": {"x": 1}}}));

        let tree = run(json!({}), "/a", json!([1, 2]));
        assert_eq!(tree.root(), &json!({"a": [1, 2]}));
    }

    #[test]
    fn test_new_without_op_is_set() {
        let tree = run(json!({"a": 1}), "/a", json!({"new": 5}));
        assert_eq!(tree.root(), &json!({"a": 5}));
    }

    #[test]
    fn test_increment_decrement() {
        let tree = run(json!({"a": 1}), "/a", json!({"op": "increment"}));
        assert_eq!(tree.root(), &json!({"a": 2}));

        let tree = run(json!({"a": 1}), "/a", json!({"op": "increment", "step": 10}));
        assert_eq!(tree.root(), &json!({"a": 11}));

        let tree = run(json!({"a": "x"}), "/a", json!({"op": "decrement", "new": 3}));
        assert_eq!(tree.root(), &json!({"a": -3}));

        let tree = run(json!({}), "/a", json!({"op": "increment", "step": 0.5}));
        assert_eq!(tree.root(), &json!({"a": 0.5}));
    }

    #[test]
    fn test_push_pop_shift_prepend() {
        let tree = run(json!({"l": [1]}), "/l", json!({"op": "push", "new": 2}));
        assert_eq!(tree.root(), &json!({"l": [1, 2]}));

        let tree = run(json!({"l": 7}), "/l", json!({"op": "push", "new": 2}));
        assert_eq!(tree.root(), &json!({"l": [2]}));

        let tree = run(json!({"l": [1, 2, 3]}), "/l", json!({"op": "pop"}));
        assert_eq!(tree.root(), &json!({"l": [1, 2]}));

        let tree = run(json!({"l": [1, 2, 3]}), "/l", json!({"op": "shift"}));
        assert_eq!(tree.root(), &json!({"l": [2, 3]}));

        let tree = run(json!({"l": [1]}), "/l", json!({"op": "prepend", "new": 0}));
        assert_eq!(tree.root(), &json!({"l": [0, 1]}));

        let tree = run(json!({"l": []}), "/l", json!({"op": "pop"}));
        assert_eq!(tree.root(), &json!({"l": []}));

        let tree = run(json!({}), "/l", json!({"op": "shift"}));
        assert_eq!(tree.root(), &json!({}));
    }

    #[test]
    fn test_push_queue_trims_oldest() {
        let tree = run(
            json!({"q": [1, 2, 3]}),
            "/q",
            json!({"op": "push-queue", "new": 4, "len": 3}),
        );
        assert_eq!(tree.root(), &json!({"q": [2, 3, 4]}));
    }

    #[test]
    fn test_erase_and_replace_first_match() {
        let tree = run(json!({"l": [1, 2, 1]}), "/l", json!({"op": "erase", "val": 1}));
        assert_eq!(tree.root(), &json!({"l": [2, 1]}));

        let tree = run(
            json!({"l": ["a", "b", "a"]}),
            "/l",
            json!({"op": "replace", "val": "a", "new": "z"}),
        );
        assert_eq!(tree.root(), &json!({"l": ["z", "b", "a"]}));
    }

    #[test]
    fn test_locks() {
        let tree = run(json!({}), "/lock", json!({"op": "read-lock", "by": "s1"}));
        assert_eq!(tree.root(), &json!({"lock": ["s1"]}));

        let tree = run(
            json!({"lock": ["s1", "s2"]}),
            "/lock",
            json!({"op": "read-unlock", "by": "s1"}),
        );
        assert_eq!(tree.root(), &json!({"lock": ["s2"]}));

        let tree = run(
            json!({"lock": ["s1"]}),
            "/lock",
            json!({"op": "read-unlock", "by": "s1"}),
        );
        assert_eq!(tree.root(), &json!({}));

        let tree = run(json!({}), "/lock", json!({"op": "write-lock", "by": "s1"}));
        assert_eq!(tree.root(), &json!({"lock": "s1"}));

        let tree = run(
            json!({"lock": "s1"}),
            "/lock",
            json!({"op": "write-unlock", "by": "s1"}),
        );
        assert_eq!(tree.root(), &json!({}));
    }

    #[test]
    fn test_observe_is_noop() {
        let tree = run(json!({"a": 1}), "/a", json!({"op": "observe"}));
        assert_eq!(tree.root(), &json!({"a": 1}));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Descriptor::parse(&json!({"op": "frobnicate"})),
            Err(OperationError::UnknownOp("frobnicate".into()))
        );
        assert_eq!(
            Descriptor::parse(&json!({"op": "push"})),
            Err(OperationError::MissingField {
                op: "push".into(),
                field: "new"
            })
        );
        assert_eq!(
            Descriptor::parse(&json!({"op": "push-queue", "new": 1})),
            Err(OperationError::MissingField {
                op: "push-queue".into(),
                field: "len"
            })
        );
        assert!(matches!(
            Descriptor::parse(&json!({"op": "increment", "step": "x"})),
            Err(OperationError::InvalidField { field: "step", .. })
        ));
    }

    #[test]
    fn test_apply_entry_tags_errors() {
        let mut tree = StateTree::new();
        let entry = LogEntry::from_request(9, json!({"/a/b": {"op": "bogus"}}));

        let err = apply_entry(&mut tree, &entry).unwrap_err();
        match err {
            ReplayError::Operation { index, path, op, .. } => {
                assert_eq!(index, LogIndex(9));
                assert_eq!(path, "/a/b");
                assert_eq!(op, "bogus");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_ttl_expires_on_later_entry() {
        let mut tree = StateTree::new();
        let t0 = Timestamp::from_millis(1_000);

        let set = LogEntry::from_request(1, json!({"/lease": {"op": "set", "new": 1, "ttl": 2}}))
            .with_timestamp(t0);
        apply_entry(&mut tree, &set).unwrap();
        assert_eq!(tree.ttl().expiry("/lease"), Some(t0.plus_secs(2.0)));

        // Exactly at expiry: still alive.
        let noop = LogEntry::from_request(2, json!({})).with_timestamp(t0.plus_secs(2.0));
        apply_entry(&mut tree, &noop).unwrap();
        assert!(tree.contains(&Path::parse("/lease")));

        let later = LogEntry::from_request(3, json!({})).with_timestamp(t0.plus_secs(2.5));
        apply_entry(&mut tree, &later).unwrap();
        assert!(!tree.contains(&Path::parse("/lease")));
        assert!(tree.ttl().is_empty());
    }

    #[test]
    fn test_rewrite_without_ttl_cancels_expiry() {
        let mut tree = StateTree::new();
        let t0 = Timestamp::from_millis(0);

        let set = LogEntry::from_request(1, json!({"/k": {"op": "set", "new": 1, "ttl": 1}}))
            .with_timestamp(t0);
        apply_entry(&mut tree, &set).unwrap();

        let rewrite = LogEntry::from_request(2, json!({"//k/": 2})).with_timestamp(t0);
        apply_entry(&mut tree, &rewrite).unwrap();

        let later = LogEntry::from_request(3, json!({})).with_timestamp(t0.plus_secs(10.0));
        apply_entry(&mut tree, &later).unwrap();
        assert_eq!(tree.root(), &json!({"k": 2}));
    }

    #[test]
    fn test_ttl_without_timestamp_is_ignored() {
        let mut tree = StateTree::new();
        let set = LogEntry::from_request(1, json!({"/k": {"op": "set", "new": 1, "ttl": 1}}));
        apply_entry(&mut tree, &set).unwrap();
        assert!(tree.ttl().is_empty());
    }
}

//! Structural diff of two values.
//!
//! Objects are compared key by key over the union of both key sets. Arrays
//! are aligned with the same minimal-edit search as line diffs, where any
//! two objects or any two arrays count as a match and are then diffed
//! recursively. Primitives compare by value.

use super::{align, Step};
use crate::state::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The difference between two values, mirroring their shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", content = "value", rename_all = "snake_case")]
pub enum JsonDiff {
    Same(Value),
    Added(Value),
    Removed(Value),
    /// A changed primitive, or a change of kind such as object to array.
    Modified { old: Value, new: Value },
    Object(BTreeMap<String, JsonDiff>),
    Array(Vec<JsonDiff>),
}

impl JsonDiff {
    /// True when nothing below this node was added, removed or modified.
    pub fn is_unchanged(&self) -> bool {
        match self {
            JsonDiff::Same(_) => true,
            JsonDiff::Added(_) | JsonDiff::Removed(_) | JsonDiff::Modified { .. } => false,
            JsonDiff::Object(members) => members.values().all(JsonDiff::is_unchanged),
            JsonDiff::Array(items) => items.iter().all(JsonDiff::is_unchanged),
        }
    }
}

pub fn diff_json(old: &Value, new: &Value) -> JsonDiff {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => diff_objects(a, b),
        (Value::Array(a), Value::Array(b)) => diff_arrays(a, b),
        (a, b) if a == b => JsonDiff::Same(a.clone()),
        (a, b) => JsonDiff::Modified {
            old: a.clone(),
            new: b.clone(),
        },
    }
}

fn diff_objects(old: &BTreeMap<String, Value>, new: &BTreeMap<String, Value>) -> JsonDiff {
    let mut members = BTreeMap::new();
    for (key, a) in old {
        let entry = match new.get(key) {
            Some(b) => diff_json(a, b),
            None => JsonDiff::Removed(a.clone()),
        };
        members.insert(key.clone(), entry);
    }
    for (key, b) in new {
        if !old.contains_key(key) {
            members.insert(key.clone(), JsonDiff::Added(b.clone()));
        }
    }
    JsonDiff::Object(members)
}

fn diff_arrays(old: &[Value], new: &[Value]) -> JsonDiff {
    let steps = align(old.len(), new.len(), |x, y| match (&old[x], &new[y]) {
        (Value::Object(_), Value::Object(_)) | (Value::Array(_), Value::Array(_)) => true,
        (a, b) => a == b,
    });

    let mut old_items = old.iter();
    let mut new_items = new.iter();
    let mut items = Vec::with_capacity(steps.len());
    for step in steps {
        let item = match step {
            Step::Keep => old_items
                .next()
                .zip(new_items.next())
                .map(|(a, b)| diff_json(a, b)),
            Step::Delete => old_items.next().cloned().map(JsonDiff::Removed),
            Step::Insert => new_items.next().cloned().map(JsonDiff::Added),
        };
        items.extend(item);
    }
    JsonDiff::Array(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn diff(a: serde_json::Value, b: serde_json::Value) -> JsonDiff {
        diff_json(&Value::from(a), &Value::from(b))
    }

    #[test]
    fn test_primitives() {
        assert_eq!(diff(json!(1), json!(1)), JsonDiff::Same(Value::from(json!(1))));
        assert_eq!(
            diff(json!("a"), json!("b")),
            JsonDiff::Modified {
                old: Value::from(json!("a")),
                new: Value::from(json!("b")),
            }
        );
        assert!(diff(json!(null), json!(null)).is_unchanged());
    }

    #[test]
    fn test_change_of_kind() {
        let d = diff(json!({"a": 1}), json!([1]));
        assert!(matches!(d, JsonDiff::Modified { .. }));
        assert!(!d.is_unchanged());
    }

    #[test]
    fn test_object_members() {
        let d = diff(
            json!({"keep": 1, "gone": true, "nested": {"x": 1}}),
            json!({"keep": 1, "new": "v", "nested": {"x": 2}}),
        );
        let JsonDiff::Object(members) = d else {
            panic!("expected an object diff");
        };
        let keys: Vec<&str> = members.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["gone", "keep", "nested", "new"]);
        assert_eq!(members["gone"], JsonDiff::Removed(Value::from(json!(true))));
        assert_eq!(members["new"], JsonDiff::Added(Value::from(json!("v"))));
        assert!(members["keep"].is_unchanged());
        assert!(!members["nested"].is_unchanged());
    }

    #[test]
    fn test_array_alignment() {
        let d = diff(json!(["a", "b", "c"]), json!(["a", "c", "d"]));
        assert_eq!(
            d,
            JsonDiff::Array(vec![
                JsonDiff::Same(Value::from(json!("a"))),
                JsonDiff::Removed(Value::from(json!("b"))),
                JsonDiff::Same(Value::from(json!("c"))),
                JsonDiff::Added(Value::from(json!("d"))),
            ])
        );
    }

    #[test]
    fn test_array_containers_diff_in_place() {
        let d = diff(
            json!([{"id": 1, "v": "old"}, [1, 2]]),
            json!([{"id": 1, "v": "new"}, [1, 2, 3]]),
        );
        let JsonDiff::Array(items) = d else {
            panic!("expected an array diff");
        };
        assert_eq!(items.len(), 2);
        let JsonDiff::Object(first) = &items[0] else {
            panic!("expected the objects to be paired");
        };
        assert!(matches!(first["v"], JsonDiff::Modified { .. }));
        assert_eq!(
            items[1],
            JsonDiff::Array(vec![
                JsonDiff::Same(Value::from(json!(1))),
                JsonDiff::Same(Value::from(json!(2))),
                JsonDiff::Added(Value::from(json!(3))),
            ])
        );
    }

    #[test]
    fn test_identical_documents_are_unchanged() {
        let doc = json!({"Plan": {"Version": 7, "shards": ["PRMR-1", "PRMR-2"]}});
        assert!(diff(doc.clone(), doc).is_unchanged());
    }

    #[test]
    fn test_serialized_form() {
        let d = diff(json!({"a": 1}), json!({"a": 2}));
        assert_eq!(
            serde_json::to_value(&d).unwrap(),
            json!({"tag": "object", "value": {
                "a": {"tag": "modified", "value": {"old": 1, "new": 2}}
            }})
        );
    }
}

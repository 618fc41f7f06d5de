//! The materialized agency state.

use super::path::{array_index, Path};
use super::ttl::TtlTable;
use super::value::{Object, Value};
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// A mutable agency tree plus its pending expiries.
///
/// Cloning is cheap: containers are shared and copied on write, so a clone
/// handed to the snapshot cache stays frozen while the original keeps
/// replaying.
#[derive(Clone, Debug, PartialEq)]
pub struct StateTree {
    root: Value,
    ttl: TtlTable,
}

/// Result of completing a partially typed path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    /// Replace the input with this path.
    Replace(String),
    /// Several keys remain; the input already covers their common prefix.
    Candidates(Vec<String>),
    /// The input names an object exactly; continue below it.
    Descend { path: String, keys: Vec<String> },
}

impl StateTree {
    /// An empty tree (the state before the genesis entry).
    pub fn new() -> Self {
        Self::from_value(Value::empty_object())
    }

    pub fn from_value(root: impl Into<Value>) -> Self {
        Self {
            root: root.into(),
            ttl: TtlTable::new(),
        }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn into_root(self) -> Value {
        self.root
    }

    pub fn ttl(&self) -> &TtlTable {
        &self.ttl
    }

    pub(crate) fn ttl_mut(&mut self) -> &mut TtlTable {
        &mut self.ttl
    }

    /// Borrow the value at a path.
    ///
    /// Digit segments index into arrays. Walking through a scalar or a
    /// missing key yields `None`.
    pub fn get_ref(&self, path: &Path) -> Option<&Value> {
        let mut current = &self.root;
        for segment in path.segments() {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(array_index(segment)?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Copy of the value at a path.
    pub fn get(&self, path: &Path) -> Option<Value> {
        self.get_ref(path).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.get_ref(path).is_some()
    }

    /// Mutable access to an existing node, copying shared containers on the
    /// way down. Navigation follows the same rules as [`get_ref`].
    ///
    /// [`get_ref`]: StateTree::get_ref
    pub(crate) fn existing_mut(&mut self, path: &Path) -> Option<&mut Value> {
        if !self.contains(path) {
            return None;
        }
        let mut current = &mut self.root;
        for segment in path.segments() {
            let next = match current {
                Value::Object(map) => Arc::make_mut(map).get_mut(segment),
                Value::Array(items) => {
                    array_index(segment).and_then(|idx| Arc::make_mut(items).get_mut(idx))
                }
                _ => None,
            };
            current = next?;
        }
        Some(current)
    }

    /// Mutable access to a node, creating it as `Null` if missing.
    ///
    /// Every intermediate node that is not an object is replaced by an empty
    /// object.
    pub(crate) fn slot_mut(&mut self, path: &Path) -> &mut Value {
        let mut current = &mut self.root;
        for segment in path.segments() {
            current = current
                .coerce_object()
                .entry(segment.clone())
                .or_insert(Value::Null);
        }
        current
    }

    /// Overwrite the value at a path.
    pub fn set(&mut self, path: &Path, value: Value) {
        *self.slot_mut(path) = value;
    }

    /// Remove the value at a path from its parent object. Deleting the root
    /// leaves an empty object.
    pub fn delete(&mut self, path: &Path) {
        let (Some(parent), Some(key)) = (path.parent(), path.last()) else {
            self.root = Value::empty_object();
            return;
        };
        match self.get_ref(&parent) {
            Some(Value::Object(map)) if map.contains_key(key) => {}
            _ => return,
        }
        if let Some(map) = self.existing_mut(&parent).and_then(Value::as_object_mut) {
            map.remove(key);
        }
    }

    /// Render the value at a path as pretty-printed JSON lines. A missing
    /// value renders as no lines.
    pub fn lines(&self, path: &Path) -> Result<Vec<String>> {
        match self.get_ref(path) {
            Some(value) => render_lines(value),
            None => Ok(Vec::new()),
        }
    }

    /// Hex SHA-256 of the canonical serialization of the whole tree.
    pub fn digest(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        serde_json::to_writer(&mut hasher, &self.root)?;
        Ok(hex::encode(hasher.finalize()))
    }

    /// Complete a partially typed path against the keys present in the tree.
    pub fn complete(&self, input: &str) -> Option<Completion> {
        if input.is_empty() {
            return Some(Completion::Replace("/".to_string()));
        }

        let path = Path::parse(input);
        if input.ends_with('/') {
            let keys = object_keys(self.get_ref(&path)?)?;
            return Some(Completion::Candidates(keys));
        }

        let parent = path.parent()?;
        let word = path.last()?;
        let siblings = self.get_ref(&parent)?.as_object()?;
        let keys: Vec<String> = siblings
            .keys()
            .filter(|k| k.starts_with(word))
            .cloned()
            .collect();

        match keys.as_slice() {
            [] => None,
            [only] if only == word => {
                let below = object_keys(siblings.get(only)?)?;
                Some(Completion::Descend {
                    path: format!("{}/", input),
                    keys: below,
                })
            }
            [only] => Some(Completion::Replace(parent.join(only.clone()).to_string())),
            _ => {
                let common = common_prefix(&keys);
                if common == word {
                    Some(Completion::Candidates(keys))
                } else {
                    Some(Completion::Replace(parent.join(common).to_string()))
                }
            }
        }
    }

    /// Select every node whose path matches a pattern of per-segment shell
    /// wildcards, e.g. `/arango/Plan/Collections/*/*/shards`.
    pub fn glob(&self, pattern: &str) -> Vec<(Path, Value)> {
        let pattern = Path::parse(pattern);
        let mut out = Vec::new();
        select(&self.root, pattern.segments(), Path::root(), &mut out);
        out
    }
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Pretty-printed JSON lines for a value.
///
/// Object keys come out sorted, so equal values always render identically.
pub fn render_lines(value: &Value) -> Result<Vec<String>> {
    let text = serde_json::to_string_pretty(value)?;
    Ok(text.lines().map(str::to_string).collect())
}

fn object_keys(value: &Value) -> Option<Vec<String>> {
    value.as_object().map(|map: &Object| map.keys().cloned().collect())
}

fn common_prefix(words: &[String]) -> String {
    let Some(first) = words.first() else {
        return String::new();
    };
    let mut len = first.len();
    for word in &words[1..] {
        len = first
            .char_indices()
            .zip(word.chars())
            .take_while(|((_, a), b)| a == b)
            .map(|((i, a), _)| i + a.len_utf8())
            .last()
            .unwrap_or(0)
            .min(len);
    }
    first[..len].to_string()
}

fn select(value: &Value, pattern: &[String], at: Path, out: &mut Vec<(Path, Value)>) {
    let Some((level, rest)) = pattern.split_first() else {
        out.push((at, value.clone()));
        return;
    };
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter() {
                if wildcard_match(level, key) {
                    select(child, rest, at.join(key.clone()), out);
                }
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                let key = idx.to_string();
                if wildcard_match(level, &key) {
                    select(child, rest, at.join(key), out);
                }
            }
        }
        _ => {}
    }
}

/// Shell-style match: `*` is any run, `?` any one character, and `[seq]` or
/// `[!seq]` a set of characters with `a-z` ranges.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        let next = match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
                continue;
            }
            Some('?') => Some(p + 1),
            Some('[') => match char_class(&pattern, p, text[t]) {
                Some((true, end)) => Some(end),
                Some((false, _)) => None,
                None if text[t] == '[' => Some(p + 1),
                None => None,
            },
            Some(c) if *c == text[t] => Some(p + 1),
            _ => None,
        };

        match (next, backtrack) {
            (Some(next), _) => {
                p = next;
                t += 1;
            }
            (None, Some((star, from))) => {
                p = star + 1;
                t = from + 1;
                backtrack = Some((star, from + 1));
            }
            (None, None) => return false,
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

/// Match `c` against the class opening at `pattern[open]`. Returns whether
/// it matched and the position after the closing `]`, or `None` when the
/// class is never closed.
fn char_class(pattern: &[char], open: usize, c: char) -> Option<(bool, usize)> {
    let mut i = open + 1;
    let negated = matches!(pattern.get(i), Some('!'));
    if negated {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    loop {
        let lo = *pattern.get(i)?;
        if lo == ']' && !first {
            return Some((matched != negated, i + 1));
        }
        first = false;
        match (pattern.get(i + 1), pattern.get(i + 2)) {
            (Some('-'), Some(&hi)) if hi != ']' => {
                matched |= lo <= c && c <= hi;
                i += 3;
            }
            _ => {
                matched |= lo == c;
                i += 1;
            }
        }
    }
}

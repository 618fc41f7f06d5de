//! Multi-pattern substring search over agency keys.
//!
//! A [`PathTrie`] is built once from labeled key strings and then reports,
//! for a line of text, every label whose key occurs in it. The line is
//! scanned once; at each character every still-extendable partial match
//! advances by one trie edge and a new match attempt starts at the root.

use std::collections::{BTreeSet, HashMap};

#[derive(Clone, Debug, Default)]
struct Node {
    children: HashMap<char, usize>,
    /// Labels whose key ends at this node.
    labels: Vec<String>,
}

/// Trie of labeled keys.
#[derive(Clone, Debug)]
pub struct PathTrie {
    nodes: Vec<Node>,
    keys: usize,
}

impl Default for PathTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl PathTrie {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
            keys: 0,
        }
    }

    /// Build from `(label, key)` pairs.
    pub fn build<I, L, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (L, K)>,
        L: Into<String>,
        K: AsRef<str>,
    {
        let mut trie = Self::new();
        for (label, key) in pairs {
            trie.insert(label, key.as_ref());
        }
        trie
    }

    /// Add a key under `label`. Empty keys are ignored.
    pub fn insert(&mut self, label: impl Into<String>, key: &str) {
        if key.is_empty() {
            return;
        }
        let mut node = 0;
        for c in key.chars() {
            node = match self.nodes[node].children.get(&c) {
                Some(&child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(Node::default());
                    self.nodes[node].children.insert(c, child);
                    child
                }
            };
        }
        self.nodes[node].labels.push(label.into());
        self.keys += 1;
    }

    /// Number of keys inserted.
    pub fn len(&self) -> usize {
        self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys == 0
    }

    /// Labels of every key occurring as a substring of `line`, including
    /// overlapping occurrences.
    pub fn find_all(&self, line: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut active: Vec<usize> = Vec::new();
        let mut next: Vec<usize> = Vec::new();

        for c in line.chars() {
            active.push(0);
            for &node in &active {
                if let Some(&child) = self.nodes[node].children.get(&c) {
                    found.extend(self.nodes[child].labels.iter().cloned());
                    if !self.nodes[child].children.is_empty() {
                        next.push(child);
                    }
                }
            }
            std::mem::swap(&mut active, &mut next);
            next.clear();
        }
        found
    }

    /// Whether any key occurs in `line`.
    pub fn matches(&self, line: &str) -> bool {
        !self.find_all(line).is_empty()
    }
}

impl<L, K> FromIterator<(L, K)> for PathTrie
where
    L: Into<String>,
    K: AsRef<str>,
{
    fn from_iter<I: IntoIterator<Item = (L, K)>>(iter: I) -> Self {
        Self::build(iter)
    }
}

//! Line diffs between two renderings of agency state.
//!
//! The alignment is a cheapest path through the grid of positions
//! `(consumed old lines, consumed new lines)`: matching an equal line is
//! free, inserting or deleting a line costs one. The grid is searched
//! uniform-cost, expanding each position at most once. The same search
//! aligns array elements for [`diff_json`].

mod json;

pub use json::{diff_json, JsonDiff};

use crate::error::Result;
use crate::state::{render_lines, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap};

/// One line of a diff.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag", content = "line", rename_all = "snake_case")]
pub enum DiffLine {
    Equal(String),
    Removed(String),
    Added(String),
}

impl DiffLine {
    pub fn text(&self) -> &str {
        match self {
            DiffLine::Equal(s) | DiffLine::Removed(s) | DiffLine::Added(s) => s,
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, DiffLine::Equal(_))
    }
}

/// One move through the alignment grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    Keep,
    Delete,
    Insert,
}

/// Cheapest path from `(0, 0)` to `(n, m)` where a diagonal move is free
/// when `same(x, y)` holds and every other move costs one.
pub(crate) fn align<F>(n: usize, m: usize, same: F) -> Vec<Step>
where
    F: Fn(usize, usize) -> bool,
{
    // (cost, furthest along first, position, predecessor)
    let mut frontier = BinaryHeap::new();
    let mut came_from: HashMap<(usize, usize), (usize, usize)> = HashMap::new();
    frontier.push(Reverse((0usize, Reverse(0usize), (0usize, 0usize), (0usize, 0usize))));

    while let Some(Reverse((cost, _, pos, from))) = frontier.pop() {
        match came_from.entry(pos) {
            Entry::Occupied(_) => continue,
            Entry::Vacant(slot) => {
                slot.insert(from);
            }
        }
        let (x, y) = pos;
        if pos == (n, m) {
            break;
        }

        let mut push = |cost: usize, next: (usize, usize)| {
            if !came_from.contains_key(&next) {
                frontier.push(Reverse((cost, Reverse(next.0 + next.1), next, pos)));
            }
        };

        // Taking a free match never makes an alignment more expensive, so
        // when one is available it is the only move worth exploring.
        if x < n && y < m && same(x, y) {
            push(cost, (x + 1, y + 1));
            continue;
        }
        if x < n {
            push(cost + 1, (x + 1, y));
        }
        if y < m {
            push(cost + 1, (x, y + 1));
        }
    }

    let mut steps = Vec::with_capacity(n.max(m));
    let mut pos = (n, m);
    while pos != (0, 0) {
        let Some(&prev) = came_from.get(&pos) else {
            break;
        };
        steps.push(match (pos.0 - prev.0, pos.1 - prev.1) {
            (1, 1) => Step::Keep,
            (1, 0) => Step::Delete,
            _ => Step::Insert,
        });
        pos = prev;
    }
    steps.reverse();
    steps
}

/// Minimal-edit alignment of two line sequences.
///
/// Within each block of changes, removed lines are listed before added
/// ones.
pub fn diff_lines<A, B>(old: &[A], new: &[B]) -> Vec<DiffLine>
where
    A: AsRef<str>,
    B: AsRef<str>,
{
    let steps = align(old.len(), new.len(), |x, y| {
        old[x].as_ref() == new[y].as_ref()
    });

    let (mut x, mut y) = (0, 0);
    let mut lines = Vec::with_capacity(steps.len());
    for step in steps {
        lines.push(match step {
            Step::Keep => {
                x += 1;
                y += 1;
                DiffLine::Equal(old[x - 1].as_ref().to_string())
            }
            Step::Delete => {
                x += 1;
                DiffLine::Removed(old[x - 1].as_ref().to_string())
            }
            Step::Insert => {
                y += 1;
                DiffLine::Added(new[y - 1].as_ref().to_string())
            }
        });
    }
    group_changes(lines)
}

/// Reorder each run of changes so removals precede additions. The cost
/// and the patch result are unaffected.
fn group_changes(lines: Vec<DiffLine>) -> Vec<DiffLine> {
    let mut out = Vec::with_capacity(lines.len());
    let mut added = Vec::new();
    for line in lines {
        match line {
            DiffLine::Added(_) => added.push(line),
            DiffLine::Removed(_) => out.push(line),
            DiffLine::Equal(_) => {
                out.append(&mut added);
                out.push(line);
            }
        }
    }
    out.append(&mut added);
    out
}

/// Diff the renderings of two optional values. A missing value renders as
/// no lines.
pub fn diff_values(old: Option<&Value>, new: Option<&Value>) -> Result<Vec<DiffLine>> {
    let old = old.map(render_lines).transpose()?.unwrap_or_default();
    let new = new.map(render_lines).transpose()?.unwrap_or_default();
    Ok(diff_lines(&old, &new))
}

/// Apply a diff to the sequence it was computed from.
///
/// Returns `None` if the diff does not fit `old`.
pub fn patch<A: AsRef<str>>(old: &[A], diff: &[DiffLine]) -> Option<Vec<String>> {
    let mut out = Vec::new();
    let mut lines = old.iter().map(AsRef::as_ref);
    for line in diff {
        match line {
            DiffLine::Equal(text) => {
                if lines.next()? != text {
                    return None;
                }
                out.push(text.clone());
            }
            DiffLine::Removed(text) => {
                if lines.next()? != text {
                    return None;
                }
            }
            DiffLine::Added(text) => out.push(text.clone()),
        }
    }
    if lines.next().is_some() {
        return None;
    }
    Some(out)
}

/// Number of changed lines in a diff.
pub fn edit_cost(diff: &[DiffLine]) -> usize {
    diff.iter().filter(|line| line.is_change()).count()
}

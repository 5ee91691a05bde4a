//! Comment normalization: raw review comments → one unit per thread.
//!
//! Threads are reconstructed from an immutable snapshot of the raw listing
//! using an index-based adjacency map. Output order is the order in which
//! threads first appear in the raw listing, and within a thread comments
//! are ordered by `(created_at, id)`, so identical input always produces
//! identical output.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::ReviewComment;

/// Normalization policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Keep threads that are resolved upstream.
    pub include_resolved: bool,
}

/// A reply folded into a unit, kept for context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReply {
    pub comment_id: String,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// One actionable review point, flattened from a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedUnit {
    pub thread_id: String,
    /// The comment that states the point: the thread root, or the earliest
    /// orphan when the root is gone.
    pub anchor_id: String,
    /// True when the real root is missing and orphans were gathered under a
    /// synthetic one.
    pub synthetic_root: bool,
    pub author: String,
    pub path: Option<String>,
    pub line: Option<u32>,
    pub body: String,
    /// Remaining comments in reply-chain order.
    pub replies: Vec<UnitReply>,
    /// Every comment folded into this unit. Lookup only.
    pub source_comment_ids: BTreeSet<String>,
}

/// Flatten raw comments into ordered units.
pub fn normalize(comments: &[ReviewComment], options: &NormalizeOptions) -> Vec<NormalizedUnit> {
    // Immutable snapshot with duplicate ids dropped (first occurrence wins).
    let mut seen = HashSet::new();
    let snapshot: Vec<&ReviewComment> = comments
        .iter()
        .filter(|c| seen.insert(c.id.as_str()))
        .collect();

    let mut thread_order: Vec<&str> = Vec::new();
    let mut by_thread: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, comment) in snapshot.iter().enumerate() {
        by_thread
            .entry(comment.thread_id.as_str())
            .or_insert_with(|| {
                thread_order.push(comment.thread_id.as_str());
                Vec::new()
            })
            .push(idx);
    }

    thread_order
        .into_iter()
        .filter_map(|thread_id| {
            let members = by_thread.get(thread_id)?;
            let thread: Vec<&ReviewComment> = members.iter().map(|&i| snapshot[i]).collect();
            if !options.include_resolved && thread.iter().any(|c| c.resolved) {
                tracing::debug!(thread_id, "skipping resolved thread");
                return None;
            }
            build_unit(thread_id, thread)
        })
        .collect()
}

fn build_unit(thread_id: &str, mut thread: Vec<&ReviewComment>) -> Option<NormalizedUnit> {
    thread.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    let position: HashMap<&str, usize> = thread
        .iter()
        .enumerate()
        .map(|(pos, c)| (c.id.as_str(), pos))
        .collect();

    // Adjacency by position. Children lists stay in sorted order because
    // positions are visited in sorted order.
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); thread.len()];
    let mut roots = Vec::new();
    let mut orphans = Vec::new();
    for (pos, comment) in thread.iter().enumerate() {
        match comment.parent_id.as_deref() {
            None => roots.push(pos),
            Some(parent) => match position.get(parent) {
                Some(&parent_pos) if parent_pos != pos => children[parent_pos].push(pos),
                _ => orphans.push(pos),
            },
        }
    }

    let mut visited = vec![false; thread.len()];
    let mut order = Vec::with_capacity(thread.len());
    for &start in roots.iter().chain(orphans.iter()) {
        walk(start, &children, &mut visited, &mut order);
    }
    // Anything still unvisited sits on a reply cycle; keep it under the
    // synthetic root rather than dropping it.
    let stranded: Vec<usize> = (0..thread.len()).filter(|&pos| !visited[pos]).collect();
    for pos in stranded {
        walk(pos, &children, &mut visited, &mut order);
    }

    let synthetic_root = roots.is_empty();
    let (&anchor_pos, rest) = order.split_first()?;
    let anchor = thread[anchor_pos];

    let path = order.iter().find_map(|&pos| thread[pos].path.clone());
    let line = order.iter().find_map(|&pos| thread[pos].line);

    Some(NormalizedUnit {
        thread_id: thread_id.to_string(),
        anchor_id: anchor.id.clone(),
        synthetic_root,
        author: anchor.author.clone(),
        path,
        line,
        body: anchor.body.clone(),
        replies: rest
            .iter()
            .map(|&pos| {
                let c = thread[pos];
                UnitReply {
                    comment_id: c.id.clone(),
                    author: c.author.clone(),
                    body: c.body.clone(),
                    created_at: c.created_at,
                }
            })
            .collect(),
        source_comment_ids: thread.iter().map(|c| c.id.clone()).collect(),
    })
}

/// Depth-first, pre-order, iterative.
fn walk(start: usize, children: &[Vec<usize>], visited: &mut [bool], order: &mut Vec<usize>) {
    let mut stack = vec![start];
    while let Some(pos) = stack.pop() {
        if visited[pos] {
            continue;
        }
        visited[pos] = true;
        order.push(pos);
        stack.extend(children[pos].iter().rev().filter(|&&child| !visited[child]));
    }
}

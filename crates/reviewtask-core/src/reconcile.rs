//! Merge freshly synthesized candidate tasks into the persisted task set.
//!
//! Reconciliation is pure: it takes the prior set (if any) and the
//! candidates and returns the next set plus a summary of what changed. The
//! caller persists the result.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{PullRequestRef, Task, TaskSet, TaskStatus};

/// What happens to a persisted task whose source no longer yields it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetentionPolicy {
    /// Keep the task, marked `cancelled`.
    #[default]
    #[serde(rename = "cancel")]
    CancelAndRetain,
    /// Drop the task from the set.
    #[serde(rename = "delete")]
    Delete,
}

/// Counts of what a reconciliation changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub added: usize,
    pub updated: usize,
    pub cancelled: usize,
    pub removed: usize,
}

impl ChangeSummary {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.cancelled == 0 && self.removed == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub set: TaskSet,
    pub summary: ChangeSummary,
}

/// Merge `candidates` into `prior`.
///
/// - New ids are inserted as given.
/// - Matching ids keep status, notes, and creation time; description and
///   location are refreshed, and `updated_at` moves only when one of them
///   changed.
/// - Prior tasks missing from the candidates are cancelled or removed per
///   `policy`.
/// - `done` and `cancelled` tasks are never modified.
///
/// Prior tasks keep their order; new tasks follow in candidate order.
#[must_use]
pub fn reconcile(
    prior: Option<&TaskSet>,
    pr: &PullRequestRef,
    candidates: Vec<Task>,
    policy: RetentionPolicy,
    now: DateTime<Utc>,
) -> Reconciliation {
    let mut summary = ChangeSummary::default();
    let mut set = prior.cloned().unwrap_or_else(|| TaskSet::new(pr.clone()));

    let mut fresh: HashMap<String, Task> = HashMap::with_capacity(candidates.len());
    let mut fresh_order = Vec::with_capacity(candidates.len());
    for task in candidates {
        if !fresh.contains_key(&task.id) {
            fresh_order.push(task.id.clone());
            fresh.insert(task.id.clone(), task);
        }
    }

    let mut kept = Vec::with_capacity(set.tasks.len() + fresh.len());
    for mut task in std::mem::take(&mut set.tasks) {
        match fresh.remove(&task.id) {
            Some(candidate) => {
                if !task.status.is_terminal() && refresh(&mut task, candidate, now) {
                    summary.updated += 1;
                }
                kept.push(task);
            }
            None => match policy {
                RetentionPolicy::CancelAndRetain if task.status.is_terminal() => kept.push(task),
                RetentionPolicy::CancelAndRetain => {
                    tracing::debug!(task_id = %task.id, "source gone, cancelling");
                    task.status = TaskStatus::Cancelled;
                    task.updated_at = now;
                    summary.cancelled += 1;
                    kept.push(task);
                }
                RetentionPolicy::Delete => {
                    tracing::debug!(task_id = %task.id, "source gone, removing");
                    summary.removed += 1;
                }
            },
        }
    }

    for id in fresh_order {
        if let Some(task) = fresh.remove(&id) {
            summary.added += 1;
            kept.push(task);
        }
    }

    set.tasks = kept;
    set.pr = pr.clone();
    set.fetched_at = Some(now);

    Reconciliation { set, summary }
}

/// Copy source-derived fields from `candidate`. Returns true if anything
/// changed.
fn refresh(task: &mut Task, candidate: Task, now: DateTime<Utc>) -> bool {
    let changed = task.description != candidate.description
        || task.path != candidate.path
        || task.line != candidate.line
        || task.author != candidate.author
        || task.source_comment_ids != candidate.source_comment_ids;
    if changed {
        task.description = candidate.description;
        task.path = candidate.path;
        task.line = candidate.line;
        task.author = candidate.author;
        task.source_comment_ids = candidate.source_comment_ids;
        task.updated_at = now;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::task_id;
    use crate::model::RepoSlug;
    use chrono::{Duration, TimeZone};

    fn pr() -> PullRequestRef {
        RepoSlug::parse("octo/widgets").unwrap().pull_request(7)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn candidate(anchor: &str, description: &str, at: DateTime<Utc>) -> Task {
        Task {
            id: task_id([anchor], 0),
            source_pr: pr(),
            source_comment_ids: [anchor.to_string()].into_iter().collect(),
            item: 0,
            description: description.to_string(),
            path: Some("src/lib.rs".to_string()),
            line: Some(4),
            author: "reviewer".to_string(),
            status: TaskStatus::Pending,
            created_at: at,
            updated_at: at,
            user_notes: None,
        }
    }

    fn first_fetch(candidates: Vec<Task>) -> TaskSet {
        reconcile(None, &pr(), candidates, RetentionPolicy::default(), t0()).set
    }

    #[test]
    fn test_first_fetch_adds_everything() {
        let result = reconcile(
            None,
            &pr(),
            vec![candidate("c1", "rename foo", t0()), candidate("c2", "add test", t0())],
            RetentionPolicy::default(),
            t0(),
        );
        assert_eq!(result.summary.added, 2);
        assert_eq!(result.set.tasks.len(), 2);
        assert_eq!(result.set.fetched_at, Some(t0()));
        assert!(result.set.tasks.iter().all(|t| t.status == TaskStatus::Pending));
    }

    #[test]
    fn test_refetch_without_changes_is_idempotent() {
        let prior = first_fetch(vec![candidate("c1", "rename foo", t0())]);
        let later = t0() + Duration::hours(1);

        let result = reconcile(
            Some(&prior),
            &pr(),
            vec![candidate("c1", "rename foo", later)],
            RetentionPolicy::default(),
            later,
        );
        assert!(result.summary.is_empty());
        assert_eq!(result.set.tasks, prior.tasks);
    }

    #[test]
    fn test_user_state_survives_refetch() {
        let mut prior = first_fetch(vec![candidate("c1", "rename foo", t0())]);
        prior.tasks[0].status = TaskStatus::InProgress;
        prior.tasks[0].user_notes = Some("halfway".to_string());
        let later = t0() + Duration::hours(1);

        let result = reconcile(
            Some(&prior),
            &pr(),
            vec![candidate("c1", "rename foo to bar", later)],
            RetentionPolicy::default(),
            later,
        );
        let task = &result.set.tasks[0];
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.user_notes.as_deref(), Some("halfway"));
        assert_eq!(task.description, "rename foo to bar");
        assert_eq!(task.created_at, t0());
        assert_eq!(task.updated_at, later);
        assert_eq!(result.summary.updated, 1);
        assert_eq!(result.summary.added, 0);
    }

    #[test]
    fn test_done_task_is_left_alone() {
        let mut prior = first_fetch(vec![candidate("c1", "rename foo", t0())]);
        prior.tasks[0].status = TaskStatus::Done;

        let result = reconcile(
            Some(&prior),
            &pr(),
            vec![candidate("c1", "rename foo", t0())],
            RetentionPolicy::default(),
            t0() + Duration::hours(1),
        );
        assert!(result.summary.is_empty());
        assert_eq!(result.set.tasks, prior.tasks);
        assert_eq!(result.set.tasks[0].id, task_id(["c1"], 0));
    }

    #[test]
    fn test_vanished_source_cancels_pending_task() {
        let prior = first_fetch(vec![candidate("c1", "rename foo", t0())]);
        let later = t0() + Duration::hours(1);

        let result = reconcile(Some(&prior), &pr(), Vec::new(), RetentionPolicy::default(), later);
        assert_eq!(result.summary.cancelled, 1);
        assert_eq!(result.set.tasks.len(), 1);
        assert_eq!(result.set.tasks[0].status, TaskStatus::Cancelled);
        assert_eq!(result.set.tasks[0].updated_at, later);
    }

    #[test]
    fn test_cancelled_task_is_not_resurrected() {
        let mut prior = first_fetch(vec![candidate("c1", "rename foo", t0())]);
        prior.tasks[0].status = TaskStatus::Cancelled;

        let result = reconcile(
            Some(&prior),
            &pr(),
            vec![candidate("c1", "rename foo again", t0())],
            RetentionPolicy::default(),
            t0() + Duration::hours(2),
        );
        assert_eq!(result.set.tasks.len(), 1);
        assert_eq!(result.set.tasks[0].status, TaskStatus::Cancelled);
        assert_eq!(result.set.tasks[0].description, "rename foo");
        assert!(result.summary.is_empty());
    }

    #[test]
    fn test_delete_policy_removes_vanished_tasks() {
        let prior = first_fetch(vec![
            candidate("c1", "rename foo", t0()),
            candidate("c2", "add test", t0()),
        ]);

        let result = reconcile(
            Some(&prior),
            &pr(),
            vec![candidate("c2", "add test", t0())],
            RetentionPolicy::Delete,
            t0(),
        );
        assert_eq!(result.summary.removed, 1);
        assert_eq!(result.summary.cancelled, 0);
        assert_eq!(result.set.tasks.len(), 1);
        assert_eq!(result.set.tasks[0].id, task_id(["c2"], 0));
    }

    #[test]
    fn test_delete_policy_removes_terminal_tasks_too() {
        let mut prior = first_fetch(vec![
            candidate("c1", "rename foo", t0()),
            candidate("c2", "add test", t0()),
        ]);
        prior.tasks[0].status = TaskStatus::Done;
        prior.tasks[1].status = TaskStatus::Cancelled;

        let result = reconcile(Some(&prior), &pr(), Vec::new(), RetentionPolicy::Delete, t0());
        assert_eq!(result.summary.removed, 2);
        assert!(result.set.tasks.is_empty());
    }

    #[test]
    fn test_cancel_policy_keeps_vanished_done_task() {
        let mut prior = first_fetch(vec![candidate("c1", "rename foo", t0())]);
        prior.tasks[0].status = TaskStatus::Done;

        let result = reconcile(
            Some(&prior),
            &pr(),
            Vec::new(),
            RetentionPolicy::CancelAndRetain,
            t0() + Duration::hours(1),
        );
        assert!(result.summary.is_empty());
        assert_eq!(result.set.tasks, prior.tasks);
    }

    #[test]
    fn test_order_is_prior_then_new() {
        let prior = first_fetch(vec![
            candidate("c2", "second", t0()),
            candidate("c1", "first", t0()),
        ]);

        let result = reconcile(
            Some(&prior),
            &pr(),
            vec![
                candidate("c3", "third", t0()),
                candidate("c1", "first", t0()),
                candidate("c2", "second", t0()),
            ],
            RetentionPolicy::default(),
            t0(),
        );
        let order: Vec<&str> = result.set.tasks.iter().map(|t| t.description.as_str()).collect();
        assert_eq!(order, vec!["second", "first", "third"]);
        assert_eq!(result.summary.added, 1);
    }

    #[test]
    fn test_retention_policy_serde_names() {
        assert_eq!(
            serde_json::to_string(&RetentionPolicy::CancelAndRetain).unwrap(),
            "\"cancel\""
        );
        let policy: RetentionPolicy = serde_json::from_str("\"delete\"").unwrap();
        assert_eq!(policy, RetentionPolicy::Delete);
    }
}

//! Domain types: pull request references, raw review data, and tasks.
//!
//! Review data (`Review`, `ReviewComment`) is read-only and sourced fresh on
//! every fetch. Tasks are the durable local record, grouped into one
//! `TaskSet` per pull request.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Repository and pull request identity
// ============================================================================

/// A GitHub repository, `owner/repo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl RepoSlug {
    /// Parse `owner/repo`. Returns `None` for anything else.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let (owner, repo) = raw.trim().split_once('/')?;
        let owner = owner.trim();
        let repo = repo.trim().trim_end_matches(".git");
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    /// Reference a pull request in this repository.
    #[must_use]
    pub fn pull_request(&self, number: u64) -> PullRequestRef {
        PullRequestRef {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            number,
        }
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Identifies the review source: one pull request in one repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PullRequestRef {
    #[must_use]
    pub fn slug(&self) -> RepoSlug {
        RepoSlug {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
        }
    }
}

impl fmt::Display for PullRequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

// ============================================================================
// Raw review data
// ============================================================================

/// Review-level verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
}

impl ReviewState {
    /// Map the provider's upper-case state names.
    #[must_use]
    pub fn from_provider(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "APPROVED" => Self::Approved,
            "CHANGES_REQUESTED" => Self::ChangesRequested,
            "DISMISSED" => Self::Dismissed,
            "PENDING" => Self::Pending,
            _ => Self::Commented,
        }
    }
}

/// A submitted review on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub reviewer: String,
    pub state: ReviewState,
    #[serde(default)]
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

/// A single reviewer comment, as seen upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    pub id: String,
    pub author: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub thread_id: String,
    /// Comment this one replies to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

/// Everything the review source returns for one pull request.
///
/// Always complete: the adapter never hands out a partially fetched snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewSnapshot {
    pub pr: PullRequestRef,
    pub reviews: Vec<Review>,
    pub comments: Vec<ReviewComment>,
}

// ============================================================================
// Tasks
// ============================================================================

/// Lifecycle state of a task.
///
/// `pending → in_progress → done` is driven by the user. Any non-terminal
/// state becomes `cancelled` when the source comments vanish upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum TaskStatus {
    #[default]
    Pending,
    #[cfg_attr(feature = "clap", value(name = "in_progress", alias = "in-progress"))]
    InProgress,
    Done,
    Cancelled,
}

impl TaskStatus {
    /// Done and cancelled tasks are never changed by reconciliation.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// One actionable item derived from review comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Derived from `source_comment_ids` (and `item`), see [`crate::ids`].
    pub id: String,
    pub source_pr: PullRequestRef,
    pub source_comment_ids: BTreeSet<String>,
    /// Position of this task among the items split out of one unit.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub item: usize,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub author: String,
    #[serde(default)]
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Free-form user notes. Opaque to reconciliation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_notes: Option<String>,
}

impl Task {
    /// `path:line`, `path`, or nothing.
    #[must_use]
    pub fn location(&self) -> Option<String> {
        match (&self.path, self.line) {
            (Some(path), Some(line)) => Some(format!("{path}:{line}")),
            (Some(path), None) => Some(path.clone()),
            _ => None,
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Persisted task format version.
pub const TASK_SET_VERSION: u32 = 1;

/// The complete persisted collection of tasks for one pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSet {
    pub version: u32,
    /// Version of the task id derivation used for every id in `tasks`.
    pub id_scheme: u32,
    pub pr: PullRequestRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl TaskSet {
    #[must_use]
    pub fn new(pr: PullRequestRef) -> Self {
        Self {
            version: TASK_SET_VERSION,
            id_scheme: crate::ids::ID_SCHEME_VERSION,
            pr,
            fetched_at: None,
            tasks: Vec::new(),
        }
    }

    #[must_use]
    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn get_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    /// Count tasks per status, in lifecycle order.
    #[must_use]
    pub fn status_counts(&self) -> [(TaskStatus, usize); 4] {
        [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Done,
            TaskStatus::Cancelled,
        ]
        .map(|status| (status, self.tasks.iter().filter(|t| t.status == status).count()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_slug_parse() {
        let slug = RepoSlug::parse("octo/widgets").unwrap();
        assert_eq!(slug.owner, "octo");
        assert_eq!(slug.repo, "widgets");
        assert_eq!(slug.to_string(), "octo/widgets");

        assert_eq!(RepoSlug::parse("octo/widgets.git").unwrap().repo, "widgets");
        assert!(RepoSlug::parse("octo").is_none());
        assert!(RepoSlug::parse("/widgets").is_none());
        assert!(RepoSlug::parse("a/b/c").is_none());
    }

    #[test]
    fn test_pull_request_display() {
        let pr = RepoSlug::parse("octo/widgets").unwrap().pull_request(42);
        assert_eq!(pr.to_string(), "octo/widgets#42");
        assert_eq!(pr.slug().to_string(), "octo/widgets");
    }

    #[test]
    fn test_review_state_from_provider() {
        assert_eq!(ReviewState::from_provider("APPROVED"), ReviewState::Approved);
        assert_eq!(
            ReviewState::from_provider("CHANGES_REQUESTED"),
            ReviewState::ChangesRequested
        );
        assert_eq!(ReviewState::from_provider("whatever"), ReviewState::Commented);
    }

    #[test]
    fn test_task_status_parse_and_display() {
        assert_eq!("in-progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("canceled".parse::<TaskStatus>().unwrap(), TaskStatus::Cancelled);
        assert!("later".parse::<TaskStatus>().is_err());
        assert_eq!(TaskStatus::InProgress.to_string(), "in_progress");
        assert!(TaskStatus::Done.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_task_status_serde_snake_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}

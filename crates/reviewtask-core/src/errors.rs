//! Typed error types for the reviewtask pipeline.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur anywhere in the fetch pipeline.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Transport or authentication failure talking to the review provider.
    #[error("Review source unavailable: {detail}")]
    SourceUnavailable { detail: String },

    /// No pull request (or repository) matched the request.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// The current branch maps to more than one open pull request.
    #[error("Branch '{branch}' has multiple open pull requests ({}). Pass a PR number: reviewtask fetch <PR_NUMBER>", format_candidates(.candidates))]
    AmbiguousBranch { branch: String, candidates: Vec<u64> },

    /// The local task store could not be read or written.
    #[error("Task store error at {path}: {detail}")]
    Persistence { path: String, detail: String },

    /// The classifier could not decide how to split a review unit.
    #[error("Ambiguous classification for thread {thread_id}")]
    ClassificationAmbiguous { thread_id: String },

    /// The repository has no `.pr-review/` directory.
    #[error("This repository is not initialized for reviewtask ({path}). Run 'reviewtask init' first.")]
    NotInitialized { path: String },

    /// The configuration file could not be parsed.
    #[error("Invalid configuration in {path}: {detail}")]
    InvalidConfig { path: String, detail: String },

    /// A task id did not match any persisted task.
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    /// Anything else.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    pub(crate) fn persistence(path: &std::path::Path, detail: impl std::fmt::Display) -> Self {
        Self::Persistence {
            path: path.display().to_string(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn unavailable(detail: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            detail: detail.into(),
        }
    }
}

fn format_candidates(candidates: &[u64]) -> String {
    candidates
        .iter()
        .map(|n| format!("#{n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_branch_lists_candidates() {
        let err = CoreError::AmbiguousBranch {
            branch: "feature/x".to_string(),
            candidates: vec![12, 40],
        };
        let msg = err.to_string();
        assert!(msg.contains("feature/x"));
        assert!(msg.contains("#12, #40"));
        assert!(msg.contains("reviewtask fetch <PR_NUMBER>"));
    }

    #[test]
    fn test_not_initialized_mentions_init() {
        let err = CoreError::NotInitialized {
            path: "/repo".to_string(),
        };
        assert!(err.to_string().contains("reviewtask init"));
    }
}

//! Review source adapter.
//!
//! A [`ReviewSource`] returns the complete current review data for a pull
//! request, or fails as a whole. Transient transport failures are retried
//! here with bounded exponential backoff; nothing downstream ever sees a
//! partial comment listing.

pub mod github;
pub mod http;

use std::thread;
use std::time::Duration;

use crate::errors::{CoreError, CoreResult};
use crate::model::{PullRequestRef, RepoSlug, ReviewSnapshot};

pub use github::GitHubSource;
pub use http::{HttpBackend, HttpResponse, ReqwestBackend};

/// Read-only access to pull request review data.
pub trait ReviewSource {
    /// Find the single open pull request whose head is `branch`.
    ///
    /// Fails with `NotFound` if there is none and `AmbiguousBranch` if there
    /// are several.
    fn find_pr_for_branch(&self, repo: &RepoSlug, branch: &str) -> CoreResult<PullRequestRef>;

    /// Fetch reviews and review comments for `pr`.
    fn fetch(&self, pr: &PullRequestRef) -> CoreResult<ReviewSnapshot>;
}

/// Pick the one candidate PR for a branch, or explain why not.
pub fn single_pr_for_branch(
    repo: &RepoSlug,
    branch: &str,
    mut numbers: Vec<u64>,
) -> CoreResult<PullRequestRef> {
    numbers.sort_unstable();
    numbers.dedup();
    match numbers.as_slice() {
        [] => Err(CoreError::NotFound {
            what: format!("no open pull request for branch '{branch}' in {repo}"),
        }),
        [number] => Ok(repo.pull_request(*number)),
        _ => Err(CoreError::AmbiguousBranch {
            branch: branch.to_string(),
            candidates: numbers,
        }),
    }
}

/// Outcome of a single attempt inside [`RetryPolicy::run`].
#[derive(Debug)]
pub enum AttemptError {
    /// Worth retrying (timeouts, connection resets, 429, 5xx).
    Transient(String),
    /// Not worth retrying; surfaced as-is.
    Fatal(CoreError),
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// Exhausted transient failures become `SourceUnavailable`.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, AttemptError>,
    ) -> CoreResult<T> {
        let attempts = self.max_attempts.max(1);
        let mut last = String::new();

        for attempt in 1..=attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Transient(detail)) => {
                    tracing::warn!(what, attempt, attempts, %detail, "transient failure");
                    last = detail;
                    if attempt < attempts {
                        thread::sleep(self.delay_for(attempt));
                    }
                }
            }
        }

        Err(CoreError::unavailable(format!(
            "{what} failed after {attempts} attempts: {last}"
        )))
    }
}

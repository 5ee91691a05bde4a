//! Shared helpers for CLI commands.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use reviewtask_core::model::{PullRequestRef, RepoSlug};
use reviewtask_core::scm::{detect_git_root, GitRepo};
use reviewtask_core::store::TaskStore;

/// Where a command runs: the repository root and which GitHub repository
/// it maps to.
#[derive(Debug, Clone)]
pub struct RepoContext {
    root: PathBuf,
    repo_override: Option<RepoSlug>,
}

impl RepoContext {
    /// Resolve the repository root from `workdir`, falling back to
    /// `workdir` itself outside a git checkout.
    pub fn discover(workdir: &Path, repo_override: Option<RepoSlug>) -> Self {
        let root = detect_git_root(workdir).unwrap_or_else(|| workdir.to_path_buf());
        Self {
            root,
            repo_override,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn git(&self) -> GitRepo {
        GitRepo::new(self.root.clone())
    }

    /// `--repo` if given, otherwise the `origin` remote.
    pub fn slug(&self) -> Result<RepoSlug> {
        if let Some(slug) = &self.repo_override {
            return Ok(slug.clone());
        }
        self.git()
            .origin_slug()
            .context("Cannot tell which GitHub repository this is. Pass --repo owner/repo")
    }

    /// Open the task store, failing if `reviewtask init` has not been run.
    pub fn store(&self) -> Result<TaskStore> {
        Ok(TaskStore::open(&self.root)?)
    }
}

/// Pick the pull request for commands that only read local state.
///
/// Uses `number` when given, otherwise the only pull request with stored
/// tasks. Returns `None` when nothing is stored yet.
pub fn stored_pr(
    store: &TaskStore,
    slug: &RepoSlug,
    number: Option<u64>,
) -> Result<Option<PullRequestRef>> {
    if let Some(number) = number {
        return Ok(Some(slug.pull_request(number)));
    }
    let numbers = store.list_pr_numbers(slug)?;
    match numbers.as_slice() {
        [] => Ok(None),
        [number] => Ok(Some(slug.pull_request(*number))),
        _ => {
            let list = numbers
                .iter()
                .map(|n| format!("#{n}"))
                .collect::<Vec<_>>()
                .join(", ");
            bail!("Tasks exist for several pull requests ({list}). Pass a PR number")
        }
    }
}

/// Parse `owner/repo` for `--repo`.
pub fn parse_repo(raw: &str) -> std::result::Result<RepoSlug, String> {
    RepoSlug::parse(raw).ok_or_else(|| format!("expected owner/repo, got '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewtask_core::config::init_repo;
    use reviewtask_core::model::TaskSet;
    use tempfile::TempDir;

    #[test]
    fn test_parse_repo() {
        assert_eq!(parse_repo("octo/widgets").unwrap().to_string(), "octo/widgets");
        assert!(parse_repo("widgets").is_err());
    }

    #[test]
    fn test_override_wins() {
        let temp = TempDir::new().unwrap();
        let ctx = RepoContext::discover(temp.path(), RepoSlug::parse("octo/widgets"));
        assert_eq!(ctx.slug().unwrap().to_string(), "octo/widgets");
    }

    #[test]
    fn test_store_requires_init() {
        let temp = TempDir::new().unwrap();
        let ctx = RepoContext::discover(temp.path(), None);
        let err = ctx.store().unwrap_err();
        assert!(err
            .to_string()
            .contains("This repository is not initialized for reviewtask"));
    }

    #[test]
    fn test_stored_pr() {
        let temp = TempDir::new().unwrap();
        init_repo(temp.path()).unwrap();
        let ctx = RepoContext::discover(temp.path(), None);
        let store = ctx.store().unwrap();
        let slug = RepoSlug::parse("octo/widgets").unwrap();

        assert!(stored_pr(&store, &slug, None).unwrap().is_none());
        assert_eq!(stored_pr(&store, &slug, Some(3)).unwrap().unwrap().number, 3);

        for number in [7, 9] {
            let pr = slug.pull_request(number);
            store
                .transaction(&pr, |_| Ok((TaskSet::new(pr.clone()), ())))
                .unwrap();
            if number == 7 {
                assert_eq!(stored_pr(&store, &slug, None).unwrap().unwrap().number, 7);
            }
        }
        assert!(stored_pr(&store, &slug, None).is_err());
    }
}

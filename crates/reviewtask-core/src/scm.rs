//! Git helpers: repository root, current branch, and the GitHub slug of a
//! remote.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::model::RepoSlug;

#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .current_dir(&self.root)
            .args(args)
            .output()
            .with_context(|| {
                if let Err(e) = which::which("git") {
                    format!("git command not found. Please install git: {e}")
                } else {
                    format!("Failed to execute git command: {args:?}")
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "git command failed with status {}: {}",
                output.status,
                stderr.trim()
            );
        }

        String::from_utf8(output.stdout).context("git output was not valid UTF-8")
    }

    /// Short name of the checked-out branch.
    ///
    /// Fails on a detached HEAD, since there is no branch to map to a PR.
    pub fn current_branch(&self) -> Result<String> {
        let output = self
            .run_git(&["symbolic-ref", "--quiet", "--short", "HEAD"])
            .context("Not on a branch (detached HEAD?). Pass a PR number instead")?;
        let branch = output.trim();
        if branch.is_empty() {
            bail!("Could not determine the current branch");
        }
        Ok(branch.to_string())
    }

    /// URL of a configured remote.
    pub fn remote_url(&self, remote: &str) -> Result<String> {
        let output = self
            .run_git(&["remote", "get-url", "--", remote])
            .with_context(|| format!("Failed to read URL of remote '{remote}'"))?;
        Ok(output.trim().to_string())
    }

    /// GitHub `owner/repo` of the `origin` remote.
    pub fn origin_slug(&self) -> Result<RepoSlug> {
        let url = self.remote_url("origin")?;
        parse_remote_slug(&url)
            .with_context(|| format!("Remote 'origin' is not a GitHub repository URL: {url}"))
    }
}

#[must_use]
pub fn detect_git_root(start_path: &Path) -> Option<PathBuf> {
    let output = Command::new("git")
        .current_dir(start_path)
        .args(["rev-parse", "--show-toplevel"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8(output.stdout).ok()?;
    let root = stdout.trim();
    if root.is_empty() {
        None
    } else {
        Some(PathBuf::from(root))
    }
}

/// Extract `owner/repo` from a remote URL.
///
/// Handles `https://host/owner/repo(.git)`, `ssh://git@host/owner/repo`,
/// and scp-style `git@host:owner/repo.git`.
#[must_use]
pub fn parse_remote_slug(url: &str) -> Option<RepoSlug> {
    let url = url.trim().trim_end_matches('/');

    let path = if let Some((_, rest)) = url.split_once("://") {
        // Drop the host (and any userinfo).
        rest.split_once('/')?.1
    } else if let Some((host, rest)) = url.split_once(':') {
        if host.contains('/') {
            return None;
        }
        rest
    } else {
        return None;
    };

    // Only the last two path segments name the repository.
    let mut segments = path.rsplitn(3, '/');
    let repo = segments.next()?;
    let owner = segments.next()?;
    RepoSlug::parse(&format!("{owner}/{repo}"))
}

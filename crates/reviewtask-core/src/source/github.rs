//! GitHub implementation of [`ReviewSource`].
//!
//! Reviews and review comments come from the REST API; thread resolution
//! comes from the GraphQL API, which is the only place GitHub exposes it.
//! Comment pages after the first are fetched concurrently and joined
//! before anything is returned.

use std::collections::{HashMap, HashSet};
use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::http::{HttpBackend, HttpResponse, ReqwestBackend};
use super::{single_pr_for_branch, AttemptError, RetryPolicy, ReviewSource};
use crate::config::GitHubConfig;
use crate::errors::{CoreError, CoreResult};
use crate::model::{PullRequestRef, RepoSlug, Review, ReviewComment, ReviewSnapshot, ReviewState};

const PER_PAGE: u32 = 100;

/// Upper bound on page requests in flight at once.
const MAX_CONCURRENT_PAGES: usize = 8;

const REVIEW_THREADS_QUERY: &str = r"
query($owner: String!, $repo: String!, $number: Int!, $cursor: String) {
  repository(owner: $owner, name: $repo) {
    pullRequest(number: $number) {
      reviewThreads(first: 100, after: $cursor) {
        pageInfo { hasNextPage endCursor }
        nodes {
          isResolved
          comments(first: 100) { nodes { databaseId } }
        }
      }
    }
  }
}";

/// Review source backed by the GitHub APIs.
#[derive(Debug, Clone)]
pub struct GitHubSource {
    http: Arc<dyn HttpBackend>,
    api_url: String,
    graphql_url: String,
    retry: RetryPolicy,
}

impl GitHubSource {
    /// Build a client from config.
    ///
    /// The token comes from config (already merged with environment
    /// overrides) or, failing that, from `gh auth token`.
    pub fn new(config: &GitHubConfig) -> CoreResult<Self> {
        let token = config
            .token
            .clone()
            .or_else(gh_cli_token)
            .ok_or_else(|| {
                CoreError::unavailable(
                    "No GitHub token found. Set GITHUB_TOKEN (or GH_TOKEN), or run 'gh auth login'",
                )
            })?;

        let backend =
            ReqwestBackend::new(&token, Duration::from_secs(config.timeout_secs.max(1)))?;
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    /// Source over an explicit HTTP backend. The token in `config` is not
    /// used; authentication is the backend's business.
    #[must_use]
    pub fn with_backend(config: &GitHubConfig, http: Arc<dyn HttpBackend>) -> Self {
        Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            graphql_url: config.graphql_url.clone(),
            retry: RetryPolicy::new(
                config.max_attempts,
                Duration::from_millis(config.base_delay_ms),
            ),
        }
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> CoreResult<(T, Option<u32>)> {
        self.retry.run(what, || {
            let response = check_status(self.http.get(url)?)?;
            let last = response.link.as_deref().and_then(last_page);
            let value = decode::<T>(&response.body)?;
            Ok((value, last))
        })
    }

    /// Fetch every page of a list endpoint.
    ///
    /// Page 1 tells us how many pages exist; the rest are fetched
    /// concurrently. Any failed page fails the whole listing.
    fn list_all<T>(&self, path: &str, what: &str) -> CoreResult<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let sep = if path.contains('?') { '&' } else { '?' };
        let page_url = |page: u32| {
            format!(
                "{}/{path}{sep}per_page={PER_PAGE}&page={page}",
                self.api_url
            )
        };

        let (mut items, last) = self.get_json::<Vec<T>>(&page_url(1), what)?;
        let last = last.unwrap_or(1);
        if last <= 1 {
            return Ok(items);
        }

        tracing::debug!(what, pages = last, "fetching remaining pages");
        let pages: Vec<u32> = (2..=last).collect();
        for chunk in pages.chunks(MAX_CONCURRENT_PAGES) {
            let results: Vec<CoreResult<Vec<T>>> = thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|&page| {
                        let url = page_url(page);
                        scope.spawn(move || self.get_json::<Vec<T>>(&url, what).map(|(v, _)| v))
                    })
                    .collect();

                handles
                    .into_iter()
                    .map(|handle| {
                        handle.join().unwrap_or_else(|_| {
                            Err(CoreError::Internal(anyhow::anyhow!(
                                "page fetch thread panicked"
                            )))
                        })
                    })
                    .collect()
            });

            for page in results {
                items.extend(page?);
            }
        }

        Ok(items)
    }

    fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
        what: &str,
    ) -> CoreResult<T> {
        let body = json!({ "query": query, "variables": variables });
        let response: GraphQlResponse<T> = self.retry.run(what, || {
            let response = check_status(self.http.post_json(&self.graphql_url, &body)?)?;
            decode(&response.body)
        })?;

        if !response.errors.is_empty() {
            let messages: Vec<String> = response.errors.into_iter().map(|e| e.message).collect();
            return Err(CoreError::unavailable(format!(
                "{what}: {}",
                messages.join("; ")
            )));
        }
        response
            .data
            .ok_or_else(|| CoreError::unavailable(format!("{what}: empty GraphQL response")))
    }

    /// Database ids of every comment that sits in a resolved thread.
    fn resolved_comment_ids(&self, pr: &PullRequestRef) -> CoreResult<HashSet<u64>> {
        let mut resolved = HashSet::new();
        let mut cursor: Option<String> = None;

        loop {
            let variables = json!({
                "owner": pr.owner,
                "repo": pr.repo,
                "number": pr.number,
                "cursor": cursor,
            });
            let data: ThreadsData =
                self.graphql(REVIEW_THREADS_QUERY, variables, "list review threads")?;
            let threads = data
                .repository
                .and_then(|r| r.pull_request)
                .ok_or_else(|| CoreError::NotFound {
                    what: format!("pull request {pr}"),
                })?
                .review_threads;

            resolved.extend(
                threads
                    .nodes
                    .iter()
                    .filter(|t| t.is_resolved)
                    .flat_map(|t| t.comments.nodes.iter().filter_map(|c| c.database_id)),
            );

            match threads.page_info.end_cursor {
                Some(next) if threads.page_info.has_next_page => cursor = Some(next),
                _ => break,
            }
        }

        Ok(resolved)
    }
}

impl ReviewSource for GitHubSource {
    #[tracing::instrument(skip(self, repo), fields(repo = %repo))]
    fn find_pr_for_branch(&self, repo: &RepoSlug, branch: &str) -> CoreResult<PullRequestRef> {
        let path = format!("repos/{}/{}/pulls?state=open", repo.owner, repo.repo);
        let pulls: Vec<ApiPull> = self
            .list_all(&path, "list open pull requests")
            .map_err(|e| match e {
                CoreError::NotFound { .. } => CoreError::NotFound {
                    what: format!("repository {repo}"),
                },
                other => other,
            })?;

        let numbers = pulls
            .into_iter()
            .filter(|p| p.head.ref_name == branch)
            .map(|p| p.number)
            .collect();
        single_pr_for_branch(repo, branch, numbers)
    }

    #[tracing::instrument(skip(self, pr), fields(pr = %pr))]
    fn fetch(&self, pr: &PullRequestRef) -> CoreResult<ReviewSnapshot> {
        let base = format!("repos/{}/{}/pulls/{}", pr.owner, pr.repo, pr.number);

        self.get_json::<ApiPull>(&format!("{}/{base}", self.api_url), "get pull request")
            .map_err(|e| match e {
                CoreError::NotFound { .. } => CoreError::NotFound {
                    what: format!("pull request {pr}"),
                },
                other => other,
            })?;

        let reviews: Vec<ApiReview> = self.list_all(&format!("{base}/reviews"), "list reviews")?;
        let comments: Vec<ApiReviewComment> =
            self.list_all(&format!("{base}/comments"), "list review comments")?;
        let resolved = self.resolved_comment_ids(pr)?;

        tracing::info!(
            reviews = reviews.len(),
            comments = comments.len(),
            resolved = resolved.len(),
            "fetched review data"
        );

        let mut all_comments = review_body_comments(&reviews);
        all_comments.extend(into_comments(comments, &resolved));

        Ok(ReviewSnapshot {
            pr: pr.clone(),
            reviews: reviews.into_iter().map(ApiReview::into_review).collect(),
            comments: all_comments,
        })
    }
}

// ============================================================================
// Response handling
// ============================================================================

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, AttemptError> {
    serde_json::from_str(body).map_err(|e| {
        AttemptError::Fatal(CoreError::unavailable(format!(
            "Malformed response from GitHub: {e}"
        )))
    })
}

fn check_status(response: HttpResponse) -> Result<HttpResponse, AttemptError> {
    if response.status.is_success() {
        Ok(response)
    } else {
        Err(classify_status(
            response.status,
            response.rate_limited,
            &response.body,
        ))
    }
}

/// Decide whether a failed HTTP status is worth retrying.
fn classify_status(status: StatusCode, rate_limited: bool, body: &str) -> AttemptError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());
    let detail = format!("HTTP {status}: {}", message.trim());

    match status {
        StatusCode::TOO_MANY_REQUESTS => AttemptError::Transient(detail),
        StatusCode::FORBIDDEN if rate_limited => AttemptError::Transient(detail),
        s if s.is_server_error() => AttemptError::Transient(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AttemptError::Fatal(
            CoreError::unavailable(format!("GitHub authentication failed ({detail})")),
        ),
        StatusCode::NOT_FOUND => AttemptError::Fatal(CoreError::NotFound { what: detail }),
        _ => AttemptError::Fatal(CoreError::unavailable(detail)),
    }
}

/// Page number of the `rel="last"` entry of a `Link` header.
fn last_page(link: &str) -> Option<u32> {
    let entry = link.split(',').find(|part| part.contains("rel=\"last\""))?;
    let url = entry
        .split(';')
        .next()?
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>');
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .find_map(|kv| kv.strip_prefix("page="))
        .and_then(|n| n.parse().ok())
}

fn gh_cli_token() -> Option<String> {
    which::which("gh").ok()?;
    let output = Command::new("gh").args(["auth", "token"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let token = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!token.is_empty()).then_some(token)
}

// ============================================================================
// Conversion to domain types
// ============================================================================

/// Review bodies carry feedback too; each becomes its own single-comment thread.
fn review_body_comments(reviews: &[ApiReview]) -> Vec<ReviewComment> {
    reviews
        .iter()
        .filter(|r| !r.state.eq_ignore_ascii_case("PENDING"))
        .filter_map(|r| {
            let body = r.body.as_deref()?.trim();
            if body.is_empty() {
                return None;
            }
            let id = format!("review-{}", r.id);
            Some(ReviewComment {
                id: id.clone(),
                author: r.user.as_ref().map(|u| u.login.clone()).unwrap_or_default(),
                body: body.to_string(),
                path: None,
                line: None,
                thread_id: id,
                parent_id: None,
                resolved: false,
                created_at: r.submitted_at.unwrap_or_default(),
            })
        })
        .collect()
}

/// Convert inline review comments, assigning each to its thread.
///
/// A thread is named after the root of its reply chain. When the root was
/// deleted, replies still group under the deleted root's id.
fn into_comments(raw: Vec<ApiReviewComment>, resolved: &HashSet<u64>) -> Vec<ReviewComment> {
    let parents: HashMap<u64, Option<u64>> =
        raw.iter().map(|c| (c.id, c.in_reply_to_id)).collect();

    raw.into_iter()
        .map(|c| {
            let root = thread_root(c.id, &parents);
            ReviewComment {
                id: c.id.to_string(),
                author: c.user.map(|u| u.login).unwrap_or_default(),
                body: c.body,
                path: c.path,
                line: c.line.or(c.original_line),
                thread_id: root.to_string(),
                parent_id: c.in_reply_to_id.map(|p| p.to_string()),
                resolved: resolved.contains(&c.id) || resolved.contains(&root),
                created_at: c.created_at,
            }
        })
        .collect()
}

fn thread_root(id: u64, parents: &HashMap<u64, Option<u64>>) -> u64 {
    let mut current = id;
    // Bounded walk: a malformed reply cycle must not hang the fetch.
    for _ in 0..=parents.len() {
        match parents.get(&current) {
            Some(Some(parent)) => current = *parent,
            _ => break,
        }
    }
    current
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiPull {
    number: u64,
    head: ApiHead,
}

#[derive(Debug, Deserialize)]
struct ApiHead {
    #[serde(rename = "ref")]
    ref_name: String,
}

#[derive(Debug, Deserialize)]
struct ApiReview {
    id: u64,
    user: Option<ApiUser>,
    state: String,
    #[serde(default)]
    body: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
}

impl ApiReview {
    fn into_review(self) -> Review {
        Review {
            id: self.id.to_string(),
            reviewer: self.user.map(|u| u.login).unwrap_or_default(),
            state: ReviewState::from_provider(&self.state),
            body: self.body.unwrap_or_default(),
            submitted_at: self.submitted_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiReviewComment {
    id: u64,
    in_reply_to_id: Option<u64>,
    user: Option<ApiUser>,
    #[serde(default)]
    body: String,
    path: Option<String>,
    line: Option<u32>,
    original_line: Option<u32>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ThreadsData {
    repository: Option<RepositoryNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    pull_request: Option<PullRequestNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestNode {
    review_threads: ThreadConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadConnection {
    page_info: PageInfo,
    nodes: Vec<ThreadNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadNode {
    is_resolved: bool,
    comments: CommentConnection,
}

#[derive(Debug, Deserialize)]
struct CommentConnection {
    nodes: Vec<CommentNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentNode {
    database_id: Option<u64>,
}

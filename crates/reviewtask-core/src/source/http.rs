//! HTTP backend for the GitHub source.
//!
//! [`GitHubSource`](super::GitHubSource) talks to GitHub through
//! [`HttpBackend`] so paging, retry, and status handling can be exercised
//! without a network. Responses are read fully into memory before they are
//! handed back.

use std::fmt::Debug;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, LINK};
use reqwest::StatusCode;

use super::AttemptError;
use crate::errors::{CoreError, CoreResult};

const USER_AGENT: &str = concat!("reviewtask/", env!("CARGO_PKG_VERSION"));

/// A response with its body already read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: StatusCode,
    /// Raw `Link` header, used for pagination.
    pub link: Option<String>,
    /// `x-ratelimit-remaining` was `0`.
    pub rate_limited: bool,
    pub body: String,
}

impl HttpResponse {
    /// A 200 response with `body` and no headers.
    #[must_use]
    pub fn ok(body: impl Into<String>) -> Self {
        Self::with_status(StatusCode::OK, body)
    }

    #[must_use]
    pub fn with_status(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            link: None,
            rate_limited: false,
            body: body.into(),
        }
    }
}

/// Blocking HTTP transport.
///
/// Transport-level failures (timeouts, resets) are `Transient`; HTTP status
/// codes are left for the caller to judge.
pub trait HttpBackend: Debug + Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse, AttemptError>;

    fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse, AttemptError>;
}

/// Production backend over a `reqwest` blocking client.
#[derive(Debug, Clone)]
pub struct ReqwestBackend {
    client: Client,
}

impl ReqwestBackend {
    /// Client that sends `token` as a bearer token on every request.
    pub fn new(token: &str, timeout: Duration) -> CoreResult<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| CoreError::unavailable("GitHub token contains invalid characters"))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::unavailable(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

impl HttpBackend for ReqwestBackend {
    fn get(&self, url: &str) -> Result<HttpResponse, AttemptError> {
        let response = self.client.get(url).send().map_err(transport_error)?;
        read_response(response)
    }

    fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse, AttemptError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .map_err(transport_error)?;
        read_response(response)
    }
}

fn read_response(response: Response) -> Result<HttpResponse, AttemptError> {
    let status = response.status();
    let headers = response.headers();
    let link = headers
        .get(LINK)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    let rate_limited = headers
        .get("x-ratelimit-remaining")
        .is_some_and(|v| v.as_bytes() == b"0");
    let body = response.text().map_err(transport_error)?;

    Ok(HttpResponse {
        status,
        link,
        rate_limited,
        body,
    })
}

#[allow(clippy::needless_pass_by_value)]
fn transport_error(e: reqwest::Error) -> AttemptError {
    AttemptError::Transient(e.to_string())
}

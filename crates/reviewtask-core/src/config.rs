//! Repository-local configuration.
//!
//! Lives at `.pr-review/config.json`. Every field has a default, so a
//! missing file or a partial file is fine.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};
use crate::reconcile::RetentionPolicy;

/// The directory name for reviewtask data.
pub const DATA_DIR: &str = ".pr-review";

/// The config filename inside [`DATA_DIR`].
pub const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_GRAPHQL_URL: &str = "https://api.github.com/graphql";

/// Environment variables checked for a GitHub token, in priority order.
const TOKEN_VARS: &[&str] = &["REVIEWTASK_GITHUB_TOKEN", "GITHUB_TOKEN", "GH_TOKEN"];

/// Environment variable overriding the REST API base URL.
const API_URL_VAR: &str = "REVIEWTASK_API_URL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Keep comments from resolved threads.
    pub include_resolved: bool,
    /// Split itemized lists in one comment into separate tasks.
    pub split_itemized: bool,
    /// What happens to tasks whose source comments vanish upstream.
    pub retention: RetentionPolicy,
    /// Task descriptions longer than this are truncated. 0 disables.
    pub max_description_chars: usize,
    pub github: GitHubConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            include_resolved: false,
            split_itemized: false,
            retention: RetentionPolicy::default(),
            max_description_chars: 200,
            github: GitHubConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub api_url: String,
    pub graphql_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub timeout_secs: u64,
    /// Attempts per request, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            graphql_url: DEFAULT_GRAPHQL_URL.to_string(),
            token: None,
            timeout_secs: 30,
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

impl Config {
    /// Load config for the repository at `repo_root`.
    ///
    /// A missing config file yields defaults. Environment overrides are
    /// applied on top.
    pub fn load(repo_root: &Path) -> CoreResult<Self> {
        let mut config = Self::load_file(&config_path(repo_root))?;
        config.apply_env(|name| env::var(name).ok());
        Ok(config)
    }

    /// Parse a config file without environment overrides.
    pub fn load_file(path: &Path) -> CoreResult<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(CoreError::InvalidConfig {
                    path: path.display().to_string(),
                    detail: e.to_string(),
                })
            }
        };

        serde_json::from_str(&raw).map_err(|e| CoreError::InvalidConfig {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(token) = TOKEN_VARS.iter().find_map(|var| non_empty(var)) {
            self.github.token = Some(token);
        }
        if let Some(url) = non_empty(API_URL_VAR) {
            self.github.api_url = url.trim_end_matches('/').to_string();
        }
    }
}

/// Path to the data directory.
pub fn data_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(DATA_DIR)
}

/// Path to the config file.
pub fn config_path(repo_root: &Path) -> PathBuf {
    data_dir(repo_root).join(CONFIG_FILE)
}

/// Check if reviewtask is initialized in the given directory.
pub fn is_initialized(repo_root: &Path) -> bool {
    data_dir(repo_root).is_dir()
}

/// Create the data directory and a default config file.
///
/// Returns `Ok(false)` if the repository was already initialized; an
/// existing config file is never overwritten.
pub fn init_repo(repo_root: &Path) -> CoreResult<bool> {
    let dir = data_dir(repo_root);
    let path = config_path(repo_root);
    if path.exists() {
        return Ok(false);
    }

    fs::create_dir_all(&dir).map_err(|e| CoreError::persistence(&dir, e))?;
    let mut body = serde_json::to_string_pretty(&Config::default())
        .map_err(|e| CoreError::Internal(e.into()))?;
    body.push('\n');
    fs::write(&path, body).map_err(|e| CoreError::persistence(&path, e))?;
    Ok(true)
}

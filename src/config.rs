use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted when the config file leaves `token` empty
pub const TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

/// Main configuration structure for mirror-mygithub
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// GitHub account name, used for basic authentication
    pub user: String,

    /// Personal access token paired with `user`
    pub token: String,

    /// Root directory that receives `users/` and `starred/`
    pub repo_root_dir: String,

    /// Listing API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Reconciliation and retry behavior
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Remote listing API configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_owned_endpoint")]
    pub owned_endpoint: String,

    #[serde(default = "default_starred_endpoint")]
    pub starred_endpoint: String,

    /// Page size requested on the first page of each listing
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Courtesy delay between listing pages, in milliseconds
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Which URL of a listed repository is handed to `git clone`
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CloneProtocol {
    /// `ssh_url` (git@github.com:owner/repo.git)
    #[default]
    Ssh,
    /// `clone_url` (https://github.com/owner/repo.git)
    Https,
}

/// What to do when a repository directory cannot be created
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryErrorPolicy {
    /// Terminate the whole run
    #[default]
    Abort,
    /// Log, skip the repository and carry on with the batch
    Skip,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_git_binary")]
    pub git_binary: String,

    /// Attempts per git command, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between attempts, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Case-sensitive stderr substrings that make a failure permanent
    #[serde(default = "default_permanent_failure_markers")]
    pub permanent_failure_markers: Vec<String>,

    /// Exit codes that end retrying without counting as a failure
    #[serde(default = "default_benign_exit_codes")]
    pub benign_exit_codes: Vec<i32>,

    #[serde(default)]
    pub clone_protocol: CloneProtocol,

    /// Drop repeated `full_name` entries within one listing
    #[serde(default = "default_true")]
    pub dedupe: bool,

    #[serde(default)]
    pub on_directory_error: DirectoryErrorPolicy,
}

// Default value functions
fn default_base_url() -> String {
    "https://api.github.com".to_string()
}
fn default_owned_endpoint() -> String {
    "/user/repos".to_string()
}
fn default_starred_endpoint() -> String {
    "/user/starred".to_string()
}
fn default_per_page() -> u32 {
    100
}
fn default_page_delay_ms() -> u64 {
    2000
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_git_binary() -> String {
    "git".to_string()
}
fn default_max_attempts() -> u32 {
    20
}
fn default_retry_delay_ms() -> u64 {
    200
}
fn default_permanent_failure_markers() -> Vec<String> {
    vec!["DMCA takedown".to_string()]
}
fn default_benign_exit_codes() -> Vec<i32> {
    vec![1]
}
fn default_true() -> bool {
    true
}

// Default implementations
impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            owned_endpoint: default_owned_endpoint(),
            starred_endpoint: default_starred_endpoint(),
            per_page: default_per_page(),
            page_delay_ms: default_page_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            git_binary: default_git_binary(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            permanent_failure_markers: default_permanent_failure_markers(),
            benign_exit_codes: default_benign_exit_codes(),
            clone_protocol: CloneProtocol::default(),
            dedupe: default_true(),
            on_directory_error: DirectoryErrorPolicy::default(),
        }
    }
}

impl ApiConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SyncConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Config {
    /// Build a configuration from the three required fields, defaults elsewhere
    pub fn new(
        user: impl Into<String>,
        token: impl Into<String>,
        repo_root_dir: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            token: token.into(),
            repo_root_dir: repo_root_dir.into(),
            api: ApiConfig::default(),
            sync: SyncConfig::default(),
        }
    }

    /// Load configuration from a specific file
    ///
    /// `.yml` and `.yaml` files are parsed as YAML, everything else as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yml") | Some("yaml")
        );

        let mut config: Config = if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        };

        if config.token.is_empty() {
            if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
                tracing::debug!("Using token from {}", TOKEN_ENV_VAR);
                config.token = token;
            }
        }

        // Expand environment variables in paths
        config.expand_paths()?;

        Ok(config)
    }

    /// Resolve the config file to use when none was given on the command line
    ///
    /// `config.json` in the working directory wins; otherwise the XDG location.
    pub fn default_config_path() -> Result<PathBuf> {
        let local = PathBuf::from("config.json");
        if local.exists() {
            return Ok(local);
        }

        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("mirror-mygithub").join("config.json"))
    }

    /// Expand `~` and environment variables in `repo_root_dir`
    pub fn expand_paths(&mut self) -> Result<()> {
        self.repo_root_dir = shellexpand::full(&self.repo_root_dir)
            .context("Failed to expand repo_root_dir path")?
            .into_owned();

        Ok(())
    }

    /// Reject configurations that cannot drive a run
    pub fn validate(&self) -> Result<()> {
        if self.user.is_empty() || self.token.is_empty() {
            bail!(
                "config: user and token can't be empty (token may also come from {})",
                TOKEN_ENV_VAR
            );
        }

        if self.repo_root_dir.is_empty() {
            bail!("config: repo_root_dir can't be empty");
        }

        if self.sync.max_attempts == 0 {
            bail!("config: sync.max_attempts must be at least 1");
        }

        Ok(())
    }

    pub fn root_dir(&self) -> PathBuf {
        PathBuf::from(&self.repo_root_dir)
    }
}

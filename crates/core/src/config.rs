//! YAML/TOML configuration for rebaiser.
//!
//! The file format is picked by extension (`.toml` is parsed as TOML,
//! anything else as YAML). Secrets normally come from the environment: after
//! parsing, [`AppConfig::apply_env_overrides`] overlays `OPENAI_API_KEY`,
//! `OPENROUTER_API_KEY`, `AI_BASE_URL`, `SLACK_WEBHOOK_URL` and
//! `GITHUB_TOKEN`, then [`AppConfig::apply_defaults`] fills the values that
//! depend on which provider is in use.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::test_runner::TestCommand;

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_DEFAULT_MODEL: &str = "anthropic/claude-3.5-sonnet";
const OPENAI_DEFAULT_MODEL: &str = "gpt-4";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Scheduling and run-mode settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Internal and upstream repository settings.
    pub git: GitConfig,

    /// Language-model settings.
    #[serde(default)]
    pub ai: AiConfig,

    /// GitHub repository and API settings.
    #[serde(default)]
    pub github: GitHubConfig,

    /// Notification settings (Slack, email).
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Validation commands run against the rebased tree.
    #[serde(default)]
    pub tests: TestsConfig,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Scheduling and run-mode configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between rebase runs (default 8 hours).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Run everything except push, PR creation and reviewer requests.
    #[serde(default)]
    pub dry_run: bool,

    /// Leave the temporary working directory on disk after each run.
    #[serde(default)]
    pub keep_artifacts: bool,

    /// Parent directory for per-run working directories (system temp if unset).
    #[serde(default)]
    pub work_root: Option<PathBuf>,
}

fn default_interval() -> u64 {
    8 * 60 * 60
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            log_level: default_log_level(),
            dry_run: false,
            keep_artifacts: false,
            work_root: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

/// Repository settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// URL (or local path) of the internal fork. Cloned as `origin`.
    pub internal_repo: String,

    /// URL (or local path) of the upstream repository.
    pub upstream_repo: String,

    /// Branch on upstream to rebase onto, and PR base branch.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Name given to the upstream remote.
    #[serde(default = "default_upstream_remote")]
    pub upstream_remote: String,

    /// Prefix of the per-run rebase branch (`<prefix>-<unix time>`).
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,

    /// Identity used for commits made by the pipeline.
    #[serde(default = "default_author_name")]
    pub author_name: String,

    #[serde(default = "default_author_email")]
    pub author_email: String,

    /// Upper bound for any single git operation.
    #[serde(default = "default_git_timeout")]
    pub timeout_secs: u64,
}

fn default_branch() -> String {
    "main".into()
}
fn default_upstream_remote() -> String {
    "upstream".into()
}
fn default_branch_prefix() -> String {
    "ai-rebase".into()
}
fn default_author_name() -> String {
    "AI Rebaser".into()
}
fn default_author_email() -> String {
    "ai-rebaser@example.com".into()
}
fn default_git_timeout() -> u64 {
    600
}

// ---------------------------------------------------------------------------
// AI
// ---------------------------------------------------------------------------

/// Language-model provider settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub openai_api_key: Option<String>,

    #[serde(default)]
    pub openrouter_api_key: Option<String>,

    /// OpenAI-compatible endpoint (OpenRouter, a proxy, a local server).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Model name; defaulted per provider by [`AppConfig::apply_defaults`].
    #[serde(default)]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    2000
}
fn default_ai_timeout() -> u64 {
    120
}

impl AiConfig {
    /// Whether the OpenRouter key takes precedence.
    pub fn uses_openrouter(&self) -> bool {
        self.openrouter_api_key.is_some()
    }

    /// The key for the provider in use.
    pub fn api_key(&self) -> Option<&str> {
        if self.uses_openrouter() {
            self.openrouter_api_key.as_deref()
        } else {
            self.openai_api_key.as_deref()
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(OPENAI_BASE_URL)
    }
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

/// GitHub repository and API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// GitHub API base URL (default `https://api.github.com`).
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// Repository in `owner/repo` format.
    #[serde(default)]
    pub repo: String,

    /// Personal access token (usually from `GITHUB_TOKEN`).
    #[serde(default)]
    pub token: Option<String>,

    /// Team slug asked to review each PR (`org/team` or `team`).
    #[serde(default)]
    pub reviewers_team: Option<String>,

    /// Individual users asked to review each PR.
    #[serde(default)]
    pub reviewers: Vec<String>,

    /// Open PRs as drafts.
    #[serde(default)]
    pub draft: bool,

    #[serde(default = "default_github_timeout")]
    pub timeout_secs: u64,
}

fn default_github_api_url() -> String {
    "https://api.github.com".into()
}
fn default_github_timeout() -> u64 {
    30
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            repo: String::new(),
            token: None,
            reviewers_team: None,
            reviewers: Vec::new(),
            draft: false,
            timeout_secs: default_github_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Slack incoming-webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_slack_channel")]
    pub channel: String,

    #[serde(default = "default_slack_username")]
    pub username: String,
}

fn default_slack_channel() -> String {
    "#dev".into()
}
fn default_slack_username() -> String {
    "AI Rebaser".into()
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            channel: default_slack_channel(),
            username: default_slack_username(),
        }
    }
}

/// Notification channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationConfig {
    #[serde(default)]
    pub slack: SlackConfig,

    /// SMTP server address for email notifications (e.g. `smtp.example.com:587`).
    #[serde(default)]
    pub email_smtp: Option<String>,

    /// Sender email address.
    #[serde(default)]
    pub email_from: Option<String>,

    /// Recipient email addresses.
    #[serde(default)]
    pub email_recipients: Vec<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Validation commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestsConfig {
    /// Default per-command timeout (default 30 minutes).
    #[serde(default = "default_test_timeout")]
    pub timeout_secs: u64,

    /// Commands, run in order.
    #[serde(default)]
    pub commands: Vec<TestCommandConfig>,
}

fn default_test_timeout() -> u64 {
    30 * 60
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_test_timeout(),
            commands: Vec::new(),
        }
    }
}

/// One configured validation command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCommandConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Directory relative to the checkout root.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Overrides `tests.timeout_secs` for this command.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl TestsConfig {
    /// Resolve per-command timeouts into runnable commands.
    pub fn commands(&self) -> Vec<TestCommand> {
        self.commands
            .iter()
            .map(|c| TestCommand {
                name: c.name.clone(),
                program: c.command.clone(),
                args: c.args.clone(),
                working_dir: c.working_dir.clone(),
                environment: c.environment.clone(),
                timeout: Duration::from_secs(c.timeout_secs.unwrap_or(self.timeout_secs)),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a YAML or TOML file.
    ///
    /// This does **not** apply the environment overlay or defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let config = if is_toml {
            Self::from_toml_str(&contents)?
        } else {
            Self::from_yaml_str(&contents)?
        };

        debug!(toml = is_toml, "configuration parsed successfully");
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Overlay secrets and endpoints from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_with(|name| std::env::var(name).ok());
    }

    /// Overlay using an arbitrary lookup. Empty values are ignored.
    pub fn apply_env_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| match lookup(name) {
            Some(val) if !val.is_empty() => {
                debug!(env_name = name, "applying env override");
                Some(val)
            }
            Some(_) => {
                warn!(env_name = name, "env var is set but empty");
                None
            }
            None => None,
        };

        if let Some(key) = get("OPENAI_API_KEY") {
            self.ai.openai_api_key = Some(key);
        }
        if let Some(key) = get("OPENROUTER_API_KEY") {
            self.ai.openrouter_api_key = Some(key);
        }
        if let Some(url) = get("AI_BASE_URL") {
            self.ai.base_url = Some(url);
        }
        if let Some(url) = get("SLACK_WEBHOOK_URL") {
            self.notifications.slack.webhook_url = Some(url);
        }
        if let Some(token) = get("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
    }

    /// Fill provider-dependent defaults (model, base URL).
    pub fn apply_defaults(&mut self) {
        let openrouter = self.ai.uses_openrouter();
        if self.ai.model.is_empty() {
            self.ai.model = if openrouter {
                OPENROUTER_DEFAULT_MODEL.into()
            } else {
                OPENAI_DEFAULT_MODEL.into()
            };
        }
        if self.ai.base_url.is_none() && openrouter {
            self.ai.base_url = Some(OPENROUTER_BASE_URL.into());
        }
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.git.internal_repo.trim().is_empty() {
            return Err(invalid("git.internal_repo", "internal repository must not be empty"));
        }
        if self.git.upstream_repo.trim().is_empty() {
            return Err(invalid("git.upstream_repo", "upstream repository must not be empty"));
        }
        if self.git.branch.trim().is_empty() {
            return Err(invalid("git.branch", "base branch must not be empty"));
        }
        if self.daemon.interval_secs == 0 {
            return Err(invalid("daemon.interval_secs", "interval must be > 0"));
        }
        if !self.daemon.dry_run && !self.github.repo.contains('/') {
            return Err(invalid(
                "github.repo",
                "GitHub repo must be in 'owner/repo' format",
            ));
        }
        for (i, cmd) in self.tests.commands.iter().enumerate() {
            if cmd.name.trim().is_empty() || cmd.command.trim().is_empty() {
                return Err(invalid(
                    &format!("tests.commands[{}]", i),
                    "test commands need a name and a command",
                ));
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.daemon.interval_secs)
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        detail: detail.into(),
    }
}

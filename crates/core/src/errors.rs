//! Error types for the rebaiser core library.
//!
//! Each collaborator has its own error type derived with `thiserror`. The
//! pipeline taxonomy ([`SetupError`], [`RebaseError`], [`ResolutionError`],
//! [`TestFailure`], [`PublishError`]) wraps those causes per phase, and
//! [`PipelineError`] unifies them for the scheduler.

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::Phase;

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// YAML / TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from the git backend (git2 and the `git` CLI).
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, remote ref, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// Push was rejected (e.g. non-fast-forward).
    #[error("git push rejected for branch '{branch}': {detail}")]
    PushRejected { branch: String, detail: String },

    /// The rebase stopped on a conflict where none was expected.
    #[error("git merge conflict: {0}")]
    MergeConflict(String),

    /// A `git` CLI invocation exited with a non-zero status.
    #[error("git {command} failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// The `git` binary was not found on `$PATH`.
    #[error("git binary not found")]
    BinaryNotFound,

    /// An operation exceeded its configured timeout.
    #[error("git {operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// A blocking git task panicked or was cancelled.
    #[error("git task failed: {0}")]
    TaskFailed(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// AI errors
// ---------------------------------------------------------------------------

/// Errors from the language-model client.
#[derive(Debug, Error)]
pub enum AiError {
    /// No API key configured for the selected provider.
    #[error("AI API key is not configured")]
    MissingApiKey,

    /// HTTP-level transport error (network, TLS, timeout).
    #[error("AI HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("AI API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// The completion contained no choices or empty content.
    #[error("AI API returned an empty completion")]
    EmptyResponse,

    /// The completion stopped at the token limit.
    #[error("AI completion was truncated at {max_tokens} tokens")]
    Truncated { max_tokens: u32 },
}

// ---------------------------------------------------------------------------
// Code host errors
// ---------------------------------------------------------------------------

/// Errors from the code-hosting REST API.
#[derive(Debug, Error)]
pub enum CodeHostError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("GitHub HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("GitHub API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// Authentication token is missing or invalid.
    #[error("GitHub authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Rate limit exceeded.
    #[error("GitHub rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: String },
}

// ---------------------------------------------------------------------------
// Notification errors
// ---------------------------------------------------------------------------

/// Errors from the notification subsystem (Slack, email).
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Slack webhook delivery failed.
    #[error("Slack notification failed: {0}")]
    SlackError(String),

    /// Email delivery failed.
    #[error("email notification failed: {0}")]
    EmailError(String),

    /// HTTP error during notification delivery.
    #[error("notification HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// All notification channels failed.
    #[error("all notification channels failed: {0}")]
    AllChannelsFailed(String),
}

// ---------------------------------------------------------------------------
// Test runner errors
// ---------------------------------------------------------------------------

/// Errors raised before a test command produced a result.
#[derive(Debug, Error)]
pub enum TestRunError {
    /// The process could not be started at all.
    #[error("failed to start test command '{name}': {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Conflict extraction errors
// ---------------------------------------------------------------------------

/// Errors from conflict extraction.
///
/// Unreadable files are skipped, so only a failure to list unmerged paths
/// surfaces here.
#[derive(Debug, Error)]
pub enum ConflictError {
    #[error("failed to list unmerged paths: {0}")]
    Listing(#[from] GitError),
}

// ---------------------------------------------------------------------------
// Pipeline phase errors
// ---------------------------------------------------------------------------

/// Setup phase failures.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to create working directory: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("failed to clone or fetch internal repository '{repo}': {source}")]
    CloneOrFetch {
        repo: String,
        #[source]
        source: GitError,
    },

    #[error("failed to add remote '{remote}': {source}")]
    AddRemote {
        remote: String,
        #[source]
        source: GitError,
    },

    #[error("failed to fetch from repositories: {0}")]
    Fetch(#[source] GitError),
}

/// Rebase phase failures. An expected conflict is not an error.
#[derive(Debug, Error)]
pub enum RebaseError {
    #[error("failed to create rebase branch '{branch}': {source}")]
    CreateBranch {
        branch: String,
        #[source]
        source: GitError,
    },

    #[error("unexpected rebase failure onto '{onto}': {source}")]
    Unexpected {
        onto: String,
        #[source]
        source: GitError,
    },

    #[error("failed to read conflicts: {0}")]
    Extraction(#[from] ConflictError),
}

/// Conflict resolution failures. Every variant aborts the remaining files.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("AI failed to resolve conflict in {}: {source}", .file.display())]
    Ai {
        file: PathBuf,
        #[source]
        source: AiError,
    },

    #[error("AI resolution for {} still contains conflict markers", .file.display())]
    ResidualMarkers { file: PathBuf },

    #[error("failed to apply resolution for {}: {source}", .file.display())]
    Apply {
        file: PathBuf,
        #[source]
        source: GitError,
    },

    #[error("failed to generate commit message: {0}")]
    CommitMessage(#[source] AiError),

    #[error("failed to commit resolved conflicts: {0}")]
    Commit(#[source] GitError),
}

impl ResolutionError {
    /// The file the failure is attributed to, when it concerns one file.
    pub fn file(&self) -> Option<&std::path::Path> {
        match self {
            Self::Ai { file, .. } | Self::ResidualMarkers { file } | Self::Apply { file, .. } => {
                Some(file)
            }
            Self::CommitMessage(_) | Self::Commit(_) => None,
        }
    }
}

/// One or more configured test commands failed.
#[derive(Debug, Error)]
#[error("tests failed: {}", .failed.join(", "))]
pub struct TestFailure {
    /// Names of every failed command, in configured order.
    pub failed: Vec<String>,
}

/// Publish phase failures. Reviewer assignment is not among them.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to push branch '{branch}': {source}")]
    Push {
        branch: String,
        #[source]
        source: GitError,
    },

    #[error("failed to generate PR description: {0}")]
    Description(#[source] AiError),

    #[error("failed to create pull request: {0}")]
    CreatePullRequest(#[source] CodeHostError),
}

/// Unified error returned by one pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("setup failed: {0}")]
    Setup(#[from] SetupError),

    #[error("git rebase failed: {0}")]
    Rebase(#[from] RebaseError),

    #[error("conflict resolution failed: {0}")]
    Resolve(#[from] ResolutionError),

    #[error(transparent)]
    Test(#[from] TestFailure),

    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),

    /// Another run on the same pipeline has not finished yet.
    #[error("a rebase run is already in progress")]
    AlreadyRunning,
}

impl PipelineError {
    /// The phase that failed, if the error came from a phase.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Setup(_) => Some(Phase::Setup),
            Self::Rebase(_) => Some(Phase::Rebase),
            Self::Resolve(_) => Some(Phase::ResolveConflicts),
            Self::Test(_) => Some(Phase::Test),
            Self::Publish(_) => Some(Phase::Publish),
            Self::AlreadyRunning => None,
        }
    }
}

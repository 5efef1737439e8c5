//! Git and GitHub collaborators.
//!
//! [`GitBackend`] is the seam the pipeline drives; [`GitCli`] is the
//! production implementation. [`github`] holds the pull-request client.

pub mod client;
pub mod github;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::GitError;

pub use client::{GitCli, GitIdentity};
pub use github::{CodeHost, GitHubClient, NewPullRequest, PullRequest};

/// How a rebase attempt ended when git itself did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseOutcome {
    /// Every commit replayed cleanly.
    Clean,
    /// The rebase stopped on conflicts and is waiting to be continued.
    Conflicted { summary: String },
}

/// Operations the pipeline needs from git. All paths are checkout roots
/// except `file` arguments, which are relative to the checkout.
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Clone `url` into `dir` (which must be empty or absent).
    async fn clone_repo(&self, url: &str, dir: &Path) -> Result<(), GitError>;

    /// Fetch every configured remote.
    async fn fetch(&self, dir: &Path) -> Result<(), GitError>;

    /// Register a remote. An existing remote with the same name is updated.
    async fn add_remote(&self, dir: &Path, name: &str, url: &str) -> Result<(), GitError>;

    /// Create `name` at HEAD and check it out.
    async fn create_branch(&self, dir: &Path, name: &str) -> Result<(), GitError>;

    /// Rebase the current branch onto `onto`.
    async fn rebase(&self, dir: &Path, onto: &str) -> Result<RebaseOutcome, GitError>;

    /// Paths with unmerged index entries.
    async fn conflicted_paths(&self, dir: &Path) -> Result<Vec<PathBuf>, GitError>;

    /// Overwrite `file` with `content` and stage it.
    async fn stage_resolution(&self, dir: &Path, file: &Path, content: &str)
        -> Result<(), GitError>;

    /// Commit the index, continuing a paused rebase if one is in progress.
    async fn commit(&self, dir: &Path, message: &str) -> Result<(), GitError>;

    /// Push `branch` to `origin`.
    async fn push(&self, dir: &Path, branch: &str) -> Result<(), GitError>;

    /// Subjects of commits reachable from HEAD but not from `base_ref`,
    /// newest first.
    async fn commit_subjects(&self, dir: &Path, base_ref: &str) -> Result<Vec<String>, GitError>;
}

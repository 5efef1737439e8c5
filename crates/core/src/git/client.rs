//! Git backend built on `git2` and the `git` CLI.
//!
//! Network and ref operations (clone, fetch, remotes, branches, push,
//! revwalk) go through `git2` on the blocking pool. Rebasing, staging and
//! committing go through the `git` binary, which owns the rebase state
//! machine. Every operation is bounded by the configured timeout.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use git2::{Cred, FetchOptions, PushOptions, RemoteCallbacks, Repository};
use regex_lite::Regex;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{GitBackend, RebaseOutcome};
use crate::config::GitConfig;
use crate::errors::GitError;

/// How long a timed-out git2 task may take to notice its cancel flag.
const CANCEL_GRACE: Duration = Duration::from_secs(30);

static CONFLICT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^CONFLICT \([^)]*\):.*$").expect("valid regex"));

/// Name and email written into commits made by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

/// Production [`GitBackend`].
#[derive(Debug, Clone)]
pub struct GitCli {
    identity: GitIdentity,
    token: Option<String>,
    timeout: Duration,
}

impl GitCli {
    pub fn new(identity: GitIdentity, token: Option<String>, timeout: Duration) -> Self {
        info!(
            author = %identity.name,
            timeout_secs = timeout.as_secs(),
            authenticated = token.is_some(),
            "created GitCli"
        );
        Self {
            identity,
            token,
            timeout,
        }
    }

    pub fn from_config(config: &GitConfig, token: Option<String>) -> Self {
        Self::new(
            GitIdentity {
                name: config.author_name.clone(),
                email: config.author_email.clone(),
            },
            token,
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Run `f` on the blocking pool under the operation timeout.
    ///
    /// `f` receives a cancel flag that is raised on timeout; the transfer
    /// callbacks from `remote_callbacks` abort once it is set. The task is
    /// awaited (up to [`CANCEL_GRACE`]) before the timeout is reported.
    async fn blocking<T, F>(&self, operation: &str, f: F) -> Result<T, GitError>
    where
        F: FnOnce(Arc<AtomicBool>) -> Result<T, GitError> + Send + 'static,
        T: Send + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut handle = tokio::task::spawn_blocking({
            let cancel = cancel.clone();
            move || f(cancel)
        });

        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(GitError::TaskFailed(join.to_string())),
            Err(_) => {
                warn!(operation, "git operation timed out, cancelling");
                cancel.store(true, Ordering::SeqCst);
                if tokio::time::timeout(CANCEL_GRACE, handle).await.is_err() {
                    warn!(operation, "cancelled git operation did not stop in time");
                }
                Err(GitError::Timeout {
                    operation: operation.into(),
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }

    /// Run `git` in `dir` and return its raw output, whatever the exit status.
    async fn run_git(&self, dir: &Path, args: &[&str]) -> Result<Output, GitError> {
        let mut cmd = Command::new("git");
        cmd.arg("-C")
            .arg(dir)
            .arg("-c")
            .arg(format!("user.name={}", self.identity.name))
            .arg("-c")
            .arg(format!("user.email={}", self.identity.email))
            .args(["-c", "core.editor=true", "-c", "commit.gpgsign=false"])
            .args(args)
            .env("GIT_EDITOR", "true")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(cmd = ?format!("git {}", args.join(" ")), "running git command");
        let operation = args.first().copied().unwrap_or("git");
        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Err(GitError::BinaryNotFound),
            Ok(Err(e)) => Err(GitError::IoError(e)),
            Err(_) => Err(GitError::Timeout {
                operation: operation.into(),
                secs: self.timeout.as_secs(),
            }),
        }
    }

    /// Run `git` and fail on a non-zero exit. Returns stdout.
    async fn git(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        let output = self.run_git(dir, args).await?;
        if !output.status.success() {
            let err = command_failed(args, &output);
            warn!(error = %err, "git command failed");
            return Err(err);
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn command_failed(args: &[&str], output: &Output) -> GitError {
    let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        stderr = String::from_utf8_lossy(&output.stdout).trim().to_string();
    }
    GitError::CommandFailed {
        command: args.first().copied().unwrap_or_default().to_string(),
        exit_code: output.status.code().unwrap_or(-1),
        stderr,
    }
}

fn rebase_in_progress(dir: &Path) -> bool {
    let git_dir = dir.join(".git");
    git_dir.join("rebase-merge").exists() || git_dir.join("rebase-apply").exists()
}

/// Summarize the `CONFLICT (...)` lines of a stopped rebase, if any.
fn conflict_summary(text: &str) -> Option<String> {
    let lines: Vec<&str> = CONFLICT_LINE.find_iter(text).map(|m| m.as_str()).collect();
    if !lines.is_empty() {
        return Some(lines.join("\n"));
    }
    text.lines()
        .find(|l| l.contains("could not apply"))
        .map(|l| l.trim().to_string())
}

fn remote_callbacks(token: Option<&str>, cancel: Arc<AtomicBool>) -> RemoteCallbacks<'static> {
    let mut callbacks = RemoteCallbacks::new();
    if let Some(tok) = token {
        let tok = tok.to_string();
        callbacks.credentials(move |_url, _username, _allowed| {
            Cred::userpass_plaintext("x-access-token", &tok)
        });
    }
    let on_transfer = cancel.clone();
    callbacks.transfer_progress(move |_| !on_transfer.load(Ordering::SeqCst));
    callbacks.sideband_progress(move |_| !cancel.load(Ordering::SeqCst));
    callbacks
}

fn open(dir: &Path) -> Result<Repository, GitError> {
    Repository::open(dir).map_err(|_| GitError::RepositoryNotFound(dir.display().to_string()))
}

#[async_trait]
impl GitBackend for GitCli {
    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn clone_repo(&self, url: &str, dir: &Path) -> Result<(), GitError> {
        info!("cloning repository");
        let url = url.to_string();
        let dir = dir.to_path_buf();
        let token = self.token.clone();
        self.blocking("clone", move |cancel| {
            let mut fetch_opts = FetchOptions::new();
            fetch_opts.remote_callbacks(remote_callbacks(token.as_deref(), cancel));
            let mut builder = git2::build::RepoBuilder::new();
            builder.fetch_options(fetch_opts);
            builder.clone(&url, &dir)?;
            Ok(())
        })
        .await?;
        info!("clone completed");
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn fetch(&self, dir: &Path) -> Result<(), GitError> {
        let dir = dir.to_path_buf();
        let token = self.token.clone();
        self.blocking("fetch", move |cancel| {
            let repo = open(&dir)?;
            let names = repo.remotes()?;
            for name in names.iter().flatten() {
                debug!(remote = name, "fetching");
                let mut remote = repo.find_remote(name)?;
                let mut fetch_opts = FetchOptions::new();
                fetch_opts.remote_callbacks(remote_callbacks(token.as_deref(), cancel.clone()));
                remote.fetch(&[] as &[&str], Some(&mut fetch_opts), None)?;
            }
            Ok(())
        })
        .await?;
        info!("fetch completed");
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn add_remote(&self, dir: &Path, name: &str, url: &str) -> Result<(), GitError> {
        let dir = dir.to_path_buf();
        let name = name.to_string();
        let url = url.to_string();
        self.blocking("remote", move |_| {
            let repo = open(&dir)?;
            if repo.find_remote(&name).is_ok() {
                debug!(remote = %name, "remote already exists, updating url");
                repo.remote_set_url(&name, &url)?;
            } else {
                repo.remote(&name, &url)?;
                info!(remote = %name, "added remote");
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn create_branch(&self, dir: &Path, name: &str) -> Result<(), GitError> {
        let dir = dir.to_path_buf();
        let name = name.to_string();
        self.blocking("branch", move |_| {
            let repo = open(&dir)?;
            let head = repo.head()?.peel_to_commit()?;
            repo.branch(&name, &head, false)?;
            repo.set_head(&format!("refs/heads/{}", name))?;
            repo.checkout_head(Some(git2::build::CheckoutBuilder::new().safe()))?;
            info!(branch = %name, sha = %head.id(), "created branch");
            Ok(())
        })
        .await
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn rebase(&self, dir: &Path, onto: &str) -> Result<RebaseOutcome, GitError> {
        info!("starting rebase");
        let args = ["rebase", onto];
        let output = self.run_git(dir, &args).await?;
        if output.status.success() {
            info!("rebase completed cleanly");
            return Ok(RebaseOutcome::Clean);
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        match conflict_summary(&text) {
            Some(summary) => {
                info!(%summary, "rebase stopped on conflicts");
                Ok(RebaseOutcome::Conflicted { summary })
            }
            None if rebase_in_progress(dir) => {
                info!("rebase stopped with a rebase in progress");
                Ok(RebaseOutcome::Conflicted {
                    summary: text.trim().to_string(),
                })
            }
            None => Err(command_failed(&args, &output)),
        }
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn conflicted_paths(&self, dir: &Path) -> Result<Vec<PathBuf>, GitError> {
        let stdout = self
            .git(dir, &["diff", "--name-only", "--diff-filter=U"])
            .await?;
        let mut paths: Vec<PathBuf> = Vec::new();
        for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let path = PathBuf::from(line);
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        debug!(count = paths.len(), "listed unmerged paths");
        Ok(paths)
    }

    #[instrument(skip(self, content), fields(dir = %dir.display(), file = %file.display()))]
    async fn stage_resolution(
        &self,
        dir: &Path,
        file: &Path,
        content: &str,
    ) -> Result<(), GitError> {
        tokio::fs::write(dir.join(file), content).await?;
        let file_arg = file.to_string_lossy();
        self.git(dir, &["add", "--", &file_arg]).await?;
        debug!("staged resolution");
        Ok(())
    }

    #[instrument(skip(self, message), fields(dir = %dir.display()))]
    async fn commit(&self, dir: &Path, message: &str) -> Result<(), GitError> {
        self.git(dir, &["commit", "--no-verify", "--allow-empty", "-m", message])
            .await?;
        info!("created commit");

        if rebase_in_progress(dir) {
            let args = ["rebase", "--continue"];
            let output = self.run_git(dir, &args).await?;
            if !output.status.success() {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                return Err(match conflict_summary(&text) {
                    Some(summary) => GitError::MergeConflict(summary),
                    None if rebase_in_progress(dir) => GitError::MergeConflict(text.trim().into()),
                    None => command_failed(&args, &output),
                });
            }
            info!("rebase continued to completion");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn push(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        info!("pushing");
        let dir = dir.to_path_buf();
        let branch = branch.to_string();
        let token = self.token.clone();
        self.blocking("push", move |cancel| {
            let repo = open(&dir)?;
            let mut remote = repo.find_remote("origin")?;

            let mut callbacks = remote_callbacks(token.as_deref(), cancel);
            let push_error = Arc::new(Mutex::new(None::<String>));
            let push_error_slot = push_error.clone();
            callbacks.push_update_reference(move |refname, status| {
                if let Some(msg) = status {
                    warn!(refname, msg, "push rejected");
                    if let Ok(mut slot) = push_error_slot.lock() {
                        *slot = Some(msg.to_string());
                    }
                }
                Ok(())
            });

            let mut push_opts = PushOptions::new();
            push_opts.remote_callbacks(callbacks);
            let refspec = format!("refs/heads/{}:refs/heads/{}", branch, branch);
            remote.push(&[&refspec], Some(&mut push_opts))?;

            let rejected = push_error.lock().ok().and_then(|mut slot| slot.take());
            if let Some(detail) = rejected {
                return Err(GitError::PushRejected { branch, detail });
            }
            Ok(())
        })
        .await?;
        info!("push completed");
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn commit_subjects(&self, dir: &Path, base_ref: &str) -> Result<Vec<String>, GitError> {
        let dir = dir.to_path_buf();
        let base_ref = base_ref.to_string();
        self.blocking("log", move |_| {
            let repo = open(&dir)?;
            let base = repo
                .revparse_single(&base_ref)
                .and_then(|obj| obj.peel_to_commit())
                .map_err(|_| GitError::RefNotFound(base_ref.clone()))?;

            let mut revwalk = repo.revwalk()?;
            revwalk.push_head()?;
            revwalk.hide(base.id())?;
            revwalk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::TIME)?;

            let mut subjects = Vec::new();
            for oid in revwalk {
                let commit = repo.find_commit(oid?)?;
                subjects.push(commit.summary().unwrap_or_default().to_string());
            }
            debug!(count = subjects.len(), "collected commit subjects");
            Ok(subjects)
        })
        .await
    }
}

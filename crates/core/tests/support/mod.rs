//! Recording collaborators shared by the pipeline integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use rebaiser_core::ai::AiAssistant;
use rebaiser_core::conflict::Conflict;
use rebaiser_core::errors::{AiError, CodeHostError, GitError, NotificationError, TestRunError};
use rebaiser_core::git::{CodeHost, GitBackend, NewPullRequest, PullRequest, RebaseOutcome};
use rebaiser_core::notify::{NotificationMessage, Notifier};
use rebaiser_core::pipeline::{Pipeline, PipelineSettings, Services};
use rebaiser_core::test_runner::{CommandResult, TestCommand, TestRunner};

pub const CONFLICTED_MAIN_GO: &str = "package main\n\
<<<<<<< HEAD\n\
func main() { println(\"internal\") }\n\
=======\n\
func main() { println(\"upstream\") }\n\
>>>>>>> upstream/main\n";

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockGit {
    pub fail_clone: bool,
    /// When set, the rebase exits non-zero with this stderr after writing
    /// any conflict files.
    pub rebase_stderr: Option<String>,
    /// Files written into the checkout when the rebase stops.
    pub conflicts: Vec<(PathBuf, String)>,
    pub calls: Mutex<Vec<String>>,
    /// How many times conflicted paths were listed.
    pub listed: Mutex<usize>,
    pub staged: Mutex<Vec<(PathBuf, String)>>,
    pub commits: Mutex<Vec<String>>,
    pub pushed: Mutex<Vec<String>>,
}

impl MockGit {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn with_conflict(mut self, file: &str, content: &str) -> Self {
        self.conflicts.push((PathBuf::from(file), content.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl GitBackend for MockGit {
    async fn clone_repo(&self, url: &str, dir: &Path) -> Result<(), GitError> {
        self.record(format!("clone {}", url));
        std::fs::create_dir_all(dir)?;
        if self.fail_clone {
            return Err(GitError::RepositoryNotFound(url.into()));
        }
        Ok(())
    }

    async fn fetch(&self, _dir: &Path) -> Result<(), GitError> {
        self.record("fetch");
        Ok(())
    }

    async fn add_remote(&self, _dir: &Path, name: &str, url: &str) -> Result<(), GitError> {
        self.record(format!("add_remote {} {}", name, url));
        Ok(())
    }

    async fn create_branch(&self, _dir: &Path, name: &str) -> Result<(), GitError> {
        self.record(format!("create_branch {}", name));
        Ok(())
    }

    async fn rebase(&self, dir: &Path, onto: &str) -> Result<RebaseOutcome, GitError> {
        self.record(format!("rebase {}", onto));
        for (file, content) in &self.conflicts {
            let path = dir.join(file);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content)?;
        }
        if let Some(stderr) = &self.rebase_stderr {
            return Err(GitError::CommandFailed {
                command: "rebase".into(),
                exit_code: 1,
                stderr: stderr.clone(),
            });
        }
        if self.conflicts.is_empty() {
            return Ok(RebaseOutcome::Clean);
        }
        Ok(RebaseOutcome::Conflicted {
            summary: format!("CONFLICT (content): {} files", self.conflicts.len()),
        })
    }

    async fn conflicted_paths(&self, _dir: &Path) -> Result<Vec<PathBuf>, GitError> {
        *self.listed.lock().unwrap() += 1;
        Ok(self.conflicts.iter().map(|(f, _)| f.clone()).collect())
    }

    async fn stage_resolution(
        &self,
        _dir: &Path,
        file: &Path,
        content: &str,
    ) -> Result<(), GitError> {
        self.record(format!("stage {}", file.display()));
        self.staged
            .lock()
            .unwrap()
            .push((file.to_path_buf(), content.to_string()));
        Ok(())
    }

    async fn commit(&self, _dir: &Path, message: &str) -> Result<(), GitError> {
        self.record("commit");
        self.commits.lock().unwrap().push(message.to_string());
        Ok(())
    }

    async fn push(&self, _dir: &Path, branch: &str) -> Result<(), GitError> {
        self.record(format!("push {}", branch));
        self.pushed.lock().unwrap().push(branch.to_string());
        Ok(())
    }

    async fn commit_subjects(&self, _dir: &Path, _base_ref: &str) -> Result<Vec<String>, GitError> {
        Ok(vec!["Add internal board support".into()])
    }
}

// ---------------------------------------------------------------------------
// AI
// ---------------------------------------------------------------------------

pub struct StubAi {
    pub resolution: String,
    pub resolved: Mutex<Vec<PathBuf>>,
    pub commit_messages: Mutex<usize>,
    pub descriptions: Mutex<usize>,
}

impl StubAi {
    pub fn answering(resolution: &str) -> Self {
        Self {
            resolution: resolution.to_string(),
            resolved: Mutex::new(Vec::new()),
            commit_messages: Mutex::new(0),
            descriptions: Mutex::new(0),
        }
    }

    pub fn total_calls(&self) -> usize {
        self.resolved.lock().unwrap().len()
            + *self.commit_messages.lock().unwrap()
            + *self.descriptions.lock().unwrap()
    }
}

#[async_trait]
impl AiAssistant for StubAi {
    async fn resolve_conflict(&self, conflict: &Conflict) -> Result<String, AiError> {
        self.resolved.lock().unwrap().push(conflict.file.clone());
        Ok(self.resolution.clone())
    }

    async fn generate_commit_message(
        &self,
        files: &[PathBuf],
        _conflicts: &[Conflict],
    ) -> Result<String, AiError> {
        *self.commit_messages.lock().unwrap() += 1;
        Ok(format!("Resolve rebase conflicts in {} files", files.len()))
    }

    async fn generate_pr_description(
        &self,
        _commits: &[String],
        _conflicts: &[Conflict],
    ) -> Result<String, AiError> {
        *self.descriptions.lock().unwrap() += 1;
        Ok("## Summary\nAutomated rebase.".into())
    }
}

// ---------------------------------------------------------------------------
// Code host
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StubCodeHost {
    pub fail_reviewers: bool,
    pub created: Mutex<Vec<NewPullRequest>>,
    pub reviewer_requests: Mutex<Vec<(u64, Vec<String>, Vec<String>)>>,
}

pub const PR_NUMBER: u64 = 42;

#[async_trait]
impl CodeHost for StubCodeHost {
    async fn create_pull_request(&self, pr: &NewPullRequest) -> Result<PullRequest, CodeHostError> {
        self.created.lock().unwrap().push(pr.clone());
        Ok(PullRequest {
            number: PR_NUMBER,
            html_url: format!("https://github.com/acme/firmware/pull/{}", PR_NUMBER),
            title: pr.title.clone(),
            state: "open".into(),
        })
    }

    async fn request_reviewers(
        &self,
        number: u64,
        users: &[String],
        teams: &[String],
    ) -> Result<(), CodeHostError> {
        self.reviewer_requests
            .lock()
            .unwrap()
            .push((number, users.to_vec(), teams.to_vec()));
        if self.fail_reviewers {
            return Err(CodeHostError::ApiError {
                status: 422,
                body: "Reviews may only be requested from collaborators".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Records every message; with `fail` set, also reports delivery failure.
#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: bool,
    pub messages: Mutex<Vec<NotificationMessage>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<NotificationMessage> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &NotificationMessage) -> Result<(), NotificationError> {
        self.messages.lock().unwrap().push(message.clone());
        if self.fail {
            return Err(NotificationError::AllChannelsFailed(
                "slack: connection refused".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Passes every command except the named ones; optionally panics.
#[derive(Default)]
pub struct ScriptedTests {
    pub failing: HashSet<String>,
    pub panic: bool,
    pub ran: Mutex<Vec<String>>,
}

impl ScriptedTests {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl TestRunner for ScriptedTests {
    async fn run_command(
        &self,
        _checkout: &Path,
        command: &TestCommand,
    ) -> Result<CommandResult, TestRunError> {
        if self.panic {
            panic!("test runner crashed");
        }
        self.ran.lock().unwrap().push(command.name.clone());
        let success = !self.failing.contains(&command.name);
        Ok(CommandResult {
            name: command.name.clone(),
            success,
            exit_code: Some(if success { 0 } else { 1 }),
            output: String::new(),
            duration: Duration::from_millis(5),
            timed_out: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn command(name: &str) -> TestCommand {
    TestCommand {
        name: name.to_string(),
        program: "true".into(),
        args: Vec::new(),
        working_dir: None,
        environment: BTreeMap::new(),
        timeout: Duration::from_secs(60),
    }
}

pub fn settings(work_root: &Path, tests: &[&str]) -> PipelineSettings {
    PipelineSettings {
        internal_repo: "https://github.com/acme/firmware.git".into(),
        upstream_repo: "https://github.com/upstream/firmware.git".into(),
        upstream_remote: "upstream".into(),
        base_branch: "main".into(),
        branch_prefix: "ai-rebase".into(),
        test_commands: tests.iter().map(|n| command(n)).collect(),
        reviewers_team: Some("acme/firmware-team".into()),
        reviewers: Vec::new(),
        draft: false,
        dry_run: false,
        keep_artifacts: false,
        work_root: work_root.to_path_buf(),
    }
}

/// Collaborators kept alongside the pipeline so tests can inspect them.
pub struct Harness {
    pub git: Arc<MockGit>,
    pub ai: Arc<StubAi>,
    pub code_host: Arc<StubCodeHost>,
    pub notifier: Arc<RecordingNotifier>,
    pub tests: Arc<ScriptedTests>,
}

impl Harness {
    pub fn new(git: MockGit, tests: ScriptedTests) -> Self {
        Self {
            git: Arc::new(git),
            ai: Arc::new(StubAi::answering("package main\n\nfunc main() {}\n")),
            code_host: Arc::new(StubCodeHost::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            tests: Arc::new(tests),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            git: self.git.clone(),
            ai: self.ai.clone(),
            code_host: self.code_host.clone(),
            notifier: self.notifier.clone(),
            tests: self.tests.clone(),
        }
    }

    pub fn pipeline(&self, settings: PipelineSettings) -> Pipeline {
        Pipeline::new(settings, self.services())
    }
}

pub fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}

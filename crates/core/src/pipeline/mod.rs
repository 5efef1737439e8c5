//! The rebase pipeline.
//!
//! One [`Pipeline::run`] walks the phases in order:
//!
//! ```text
//! Setup -> Rebase -> ResolveConflicts -> Test -> Publish -> Notify -> Done
//! ```
//!
//! ResolveConflicts is skipped when the rebase left no conflicts. Any phase
//! failure ends the run, sends one error notification and returns the
//! error. The working directory is removed on every exit path unless
//! artifacts are kept.

pub mod workspace;

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::ai::AiAssistant;
use crate::config::AppConfig;
use crate::conflict::{extract_conflicts, Conflict, ConflictResolver, ResolutionReport};
use crate::errors::{
    GitError, PipelineError, PublishError, RebaseError, SetupError, TestFailure,
};
use crate::git::{CodeHost, GitBackend, NewPullRequest, PullRequest, RebaseOutcome};
use crate::notify::{NotificationLevel, NotificationMessage, Notifier};
use crate::test_runner::{run_suite, TestCommand, TestOutcome, TestRunner};

pub use workspace::WorkDir;

const CHECKOUT_DIR: &str = "internal";

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Rebase,
    ResolveConflicts,
    Test,
    Publish,
    Notify,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Rebase => write!(f, "rebase"),
            Self::ResolveConflicts => write!(f, "resolve_conflicts"),
            Self::Test => write!(f, "test"),
            Self::Publish => write!(f, "publish"),
            Self::Notify => write!(f, "notify"),
            Self::Done => write!(f, "done"),
        }
    }
}

impl Phase {
    /// Title of the notification sent when this phase fails.
    pub fn failure_title(self) -> &'static str {
        match self {
            Self::Setup => "AI Rebaser - Setup Failed",
            Self::Rebase => "AI Rebaser - Git Rebase Failed",
            Self::ResolveConflicts => "AI Rebaser - Conflict Resolution Failed",
            Self::Test => "AI Rebaser - Tests Failed",
            Self::Publish => "AI Rebaser - PR Creation Failed",
            Self::Notify | Self::Done => "AI Rebaser - Run Failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// The collaborators a pipeline drives.
#[derive(Clone)]
pub struct Services {
    pub git: Arc<dyn GitBackend>,
    pub ai: Arc<dyn AiAssistant>,
    pub code_host: Arc<dyn CodeHost>,
    pub notifier: Arc<dyn Notifier>,
    pub tests: Arc<dyn TestRunner>,
}

/// Everything a run needs from configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub internal_repo: String,
    pub upstream_repo: String,
    pub upstream_remote: String,
    pub base_branch: String,
    pub branch_prefix: String,
    pub test_commands: Vec<TestCommand>,
    pub reviewers_team: Option<String>,
    pub reviewers: Vec<String>,
    pub draft: bool,
    pub dry_run: bool,
    pub keep_artifacts: bool,
    /// Parent of the per-run working directories.
    pub work_root: PathBuf,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            internal_repo: config.git.internal_repo.clone(),
            upstream_repo: config.git.upstream_repo.clone(),
            upstream_remote: config.git.upstream_remote.clone(),
            base_branch: config.git.branch.clone(),
            branch_prefix: config.git.branch_prefix.clone(),
            test_commands: config.tests.commands(),
            reviewers_team: config
                .github
                .reviewers_team
                .clone()
                .filter(|t| !t.trim().is_empty()),
            reviewers: config.github.reviewers.clone(),
            draft: config.github.draft,
            dry_run: config.daemon.dry_run,
            keep_artifacts: config.daemon.keep_artifacts,
            work_root: config
                .daemon
                .work_root
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        }
    }

    /// `<remote>/<branch>`, the ref rebased onto.
    pub fn upstream_ref(&self) -> String {
        format!("{}/{}", self.upstream_remote, self.base_branch)
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// State owned by one run.
#[derive(Debug)]
pub struct RunContext {
    pub phase: Phase,
    /// Checkout of the internal repository inside the working directory.
    pub checkout: PathBuf,
    pub branch: String,
    pub conflicts: Vec<Conflict>,
    pub resolution: Option<ResolutionReport>,
    pub test_outcome: Option<TestOutcome>,
    /// Subjects of the commits the PR carries.
    pub commits: Vec<String>,
    pub pull_request: Option<PullRequest>,
}

impl RunContext {
    fn new(checkout: PathBuf, branch: String) -> Self {
        Self {
            phase: Phase::Setup,
            checkout,
            branch,
            conflicts: Vec::new(),
            resolution: None,
            test_outcome: None,
            commits: Vec::new(),
            pull_request: None,
        }
    }

    fn enter(&mut self, phase: Phase) {
        info!(phase = %phase, branch = %self.branch, "entering phase");
        self.phase = phase;
    }
}

/// What a successful run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub branch: String,
    pub conflicted_files: Vec<PathBuf>,
    pub resolved_files: Vec<PathBuf>,
    pub commits: usize,
    pub test_outcome: Option<TestOutcome>,
    pub pull_request: Option<PullRequest>,
    pub dry_run: bool,
}

/// Clears the running flag on drop (even on panic).
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    settings: PipelineSettings,
    services: Services,
    resolver: ConflictResolver,
    running: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings, services: Services) -> Self {
        let resolver = ConflictResolver::new(services.ai.clone(), services.git.clone());
        Self {
            settings,
            services,
            resolver,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run every phase once against a fresh working directory.
    #[instrument(skip(self), fields(dry_run = self.settings.dry_run))]
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("rebase run already in progress");
            return Err(PipelineError::AlreadyRunning);
        }
        let _guard = RunningGuard(self.running.clone());

        info!("starting rebase run");
        let work = match WorkDir::create(&self.settings.work_root, self.settings.keep_artifacts) {
            Ok(work) => work,
            Err(e) => {
                let err = PipelineError::Setup(SetupError::Workspace(e));
                self.notify_failure(&err, 0).await;
                return Err(err);
            }
        };

        let mut ctx = RunContext::new(work.path().join(CHECKOUT_DIR), self.branch_name());
        let result = self.run_phases(&mut ctx).await;

        match result {
            Ok(()) => {
                ctx.enter(Phase::Notify);
                self.notify_success(&ctx).await;
                ctx.enter(Phase::Done);
                info!(branch = %ctx.branch, "rebase run completed successfully");
                Ok(self.summary(ctx))
            }
            Err(err) => {
                error!(phase = %ctx.phase, error = %err, "rebase run failed");
                self.notify_failure(&err, ctx.conflicts.len()).await;
                Err(err)
            }
        }
        // `work` drops here and removes the directory.
    }

    async fn run_phases(&self, ctx: &mut RunContext) -> Result<(), PipelineError> {
        ctx.enter(Phase::Setup);
        self.setup(ctx).await?;

        ctx.enter(Phase::Rebase);
        self.rebase(ctx).await?;

        if ctx.conflicts.is_empty() {
            info!("no conflicts detected, skipping resolution");
        } else {
            ctx.enter(Phase::ResolveConflicts);
            let report = self
                .resolver
                .resolve_all(&ctx.checkout, &ctx.conflicts)
                .await?;
            ctx.resolution = Some(report);
        }

        ctx.enter(Phase::Test);
        self.test(ctx).await?;

        ctx.enter(Phase::Publish);
        self.publish(ctx).await?;
        Ok(())
    }

    fn branch_name(&self) -> String {
        format!("{}-{}", self.settings.branch_prefix, Utc::now().timestamp())
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    async fn setup(&self, ctx: &mut RunContext) -> Result<(), SetupError> {
        let git = &self.services.git;
        let repo = &self.settings.internal_repo;

        if let Err(clone_err) = git.clone_repo(repo, &ctx.checkout).await {
            warn!(error = %clone_err, "clone failed, attempting to fetch instead");
            git.fetch(&ctx.checkout)
                .await
                .map_err(|source| SetupError::CloneOrFetch {
                    repo: repo.clone(),
                    source,
                })?;
        }

        git.add_remote(
            &ctx.checkout,
            &self.settings.upstream_remote,
            &self.settings.upstream_repo,
        )
        .await
        .map_err(|source| SetupError::AddRemote {
            remote: self.settings.upstream_remote.clone(),
            source,
        })?;

        git.fetch(&ctx.checkout).await.map_err(SetupError::Fetch)?;
        info!(checkout = %ctx.checkout.display(), "working directory ready");
        Ok(())
    }

    async fn rebase(&self, ctx: &mut RunContext) -> Result<(), RebaseError> {
        let git = &self.services.git;

        git.create_branch(&ctx.checkout, &ctx.branch)
            .await
            .map_err(|source| RebaseError::CreateBranch {
                branch: ctx.branch.clone(),
                source,
            })?;

        let onto = self.settings.upstream_ref();
        match git.rebase(&ctx.checkout, &onto).await {
            Ok(RebaseOutcome::Clean) => info!(onto = %onto, "rebase applied cleanly"),
            Ok(RebaseOutcome::Conflicted { summary }) => {
                info!(onto = %onto, %summary, "rebase conflicts detected, proceeding with resolution")
            }
            Err(e) if is_conflict_error(&e) => {
                info!(onto = %onto, error = %e, "rebase reported conflicts, proceeding with resolution")
            }
            Err(source) => return Err(RebaseError::Unexpected { onto, source }),
        }

        ctx.conflicts = extract_conflicts(git.as_ref(), &ctx.checkout).await?;
        info!(conflicts = ctx.conflicts.len(), "git rebase completed");
        Ok(())
    }

    async fn test(&self, ctx: &mut RunContext) -> Result<(), TestFailure> {
        let outcome = run_suite(
            self.services.tests.as_ref(),
            &ctx.checkout,
            &self.settings.test_commands,
        )
        .await;

        let failed = outcome.failed_names();
        let duration_ms = outcome.duration.as_millis() as u64;
        ctx.test_outcome = Some(outcome);

        if !failed.is_empty() {
            error!(failed_tests = ?failed, "tests failed");
            return Err(TestFailure { failed });
        }
        info!(duration_ms, "all tests passed");
        Ok(())
    }

    async fn publish(&self, ctx: &mut RunContext) -> Result<(), PublishError> {
        let services = &self.services;

        ctx.commits = match services
            .git
            .commit_subjects(&ctx.checkout, &self.settings.upstream_ref())
            .await
        {
            Ok(commits) => commits,
            Err(e) => {
                warn!(error = %e, "could not list commits for the PR description");
                Vec::new()
            }
        };

        if self.settings.dry_run {
            info!(
                branch = %ctx.branch,
                commits = ctx.commits.len(),
                "dry run: skipping push and pull request"
            );
            return Ok(());
        }

        services
            .git
            .push(&ctx.checkout, &ctx.branch)
            .await
            .map_err(|source| PublishError::Push {
                branch: ctx.branch.clone(),
                source,
            })?;

        let body = services
            .ai
            .generate_pr_description(&ctx.commits, &ctx.conflicts)
            .await
            .map_err(PublishError::Description)?;

        let pr = services
            .code_host
            .create_pull_request(&NewPullRequest {
                title: pr_title(),
                body,
                head: ctx.branch.clone(),
                base: self.settings.base_branch.clone(),
                draft: self.settings.draft,
            })
            .await
            .map_err(PublishError::CreatePullRequest)?;

        let teams: Vec<String> = self.settings.reviewers_team.iter().cloned().collect();
        if !teams.is_empty() || !self.settings.reviewers.is_empty() {
            if let Err(e) = services
                .code_host
                .request_reviewers(pr.number, &self.settings.reviewers, &teams)
                .await
            {
                warn!(pr_number = pr.number, error = %e, "failed to add reviewers");
            }
        }

        info!(pr_number = pr.number, url = %pr.html_url, "pull request created successfully");
        ctx.pull_request = Some(pr);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    async fn notify_success(&self, ctx: &RunContext) {
        let message = success_message(ctx);
        if let Err(e) = self.services.notifier.send(&message).await {
            warn!(error = %e, "failed to send notification");
        }
    }

    async fn notify_failure(&self, err: &PipelineError, conflicts: usize) {
        let message = failure_message(err, conflicts);
        if let Err(e) = self.services.notifier.send(&message).await {
            error!(error = %e, "failed to send error notification");
        }
    }

    fn summary(&self, ctx: RunContext) -> RunSummary {
        RunSummary {
            branch: ctx.branch,
            conflicted_files: ctx.conflicts.iter().map(|c| c.file.clone()).collect(),
            resolved_files: ctx.resolution.map(|r| r.files).unwrap_or_default(),
            commits: ctx.commits.len(),
            test_outcome: ctx.test_outcome,
            pull_request: ctx.pull_request,
            dry_run: self.settings.dry_run,
        }
    }
}

/// Whether a rebase error is really a conflict stop.
fn is_conflict_error(err: &GitError) -> bool {
    if matches!(err, GitError::MergeConflict(_)) {
        return true;
    }
    let text = err.to_string();
    text.contains("conflict") || text.contains("CONFLICT")
}

fn pr_title() -> String {
    format!("AI-assisted rebase - {}", Utc::now().format("%Y-%m-%d"))
}

fn file_list(conflicts: &[Conflict]) -> String {
    conflicts
        .iter()
        .map(|c| c.file.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn success_message(ctx: &RunContext) -> NotificationMessage {
    let Some(pr) = &ctx.pull_request else {
        let resolved = if ctx.conflicts.is_empty() {
            "no conflicts".to_string()
        } else {
            format!(
                "{} resolved conflicts ({})",
                ctx.conflicts.len(),
                file_list(&ctx.conflicts)
            )
        };
        return NotificationMessage::new(
            NotificationLevel::Info,
            "AI Rebaser - Dry Run Completed",
            format!(
                "Dry run finished on branch {} with {}. No branch was pushed and no PR was opened.",
                ctx.branch, resolved
            ),
        );
    };

    let text = if ctx.conflicts.is_empty() {
        format!(
            "✅ Rebase completed with no conflicts. PR #{} is ready for review.",
            pr.number
        )
    } else {
        format!(
            "🤖 AI-assisted rebase completed! Resolved {} conflicts in files: {}. PR #{} is ready for review.",
            ctx.conflicts.len(),
            file_list(&ctx.conflicts),
            pr.number
        )
    };
    NotificationMessage::new(NotificationLevel::Success, "AI Rebaser - Rebase Completed", text)
        .with_url(pr.html_url.clone())
}

fn failure_message(err: &PipelineError, conflicts: usize) -> NotificationMessage {
    let phase = err.phase().unwrap_or(Phase::Done);
    let summary = match phase {
        Phase::Setup => "Failed to setup working directory".to_string(),
        Phase::Rebase => "Failed to perform git rebase".to_string(),
        Phase::ResolveConflicts => format!("Failed to resolve {} conflicts with AI", conflicts),
        Phase::Test => "Tests failed after rebase".to_string(),
        Phase::Publish => "Failed to create pull request".to_string(),
        Phase::Notify | Phase::Done => "Rebase run failed".to_string(),
    };
    NotificationMessage::new(
        NotificationLevel::Error,
        phase.failure_title(),
        format!("❌ {}\n\nError: {}", summary, err),
    )
}

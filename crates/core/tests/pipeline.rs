//! Pipeline scenarios against recording collaborators.

mod support;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use rebaiser_core::errors::{GitError, PipelineError, RebaseError, TestRunError};
use rebaiser_core::notify::NotificationLevel;
use rebaiser_core::pipeline::Pipeline;
use rebaiser_core::test_runner::{CommandResult, TestCommand, TestRunner};

use support::*;

#[tokio::test]
async fn test_clean_rebase_skips_ai_and_opens_pr() {
    let root = TempDir::new().unwrap();
    let h = Harness::new(MockGit::clean(), ScriptedTests::default());
    let pipeline = h.pipeline(settings(root.path(), &["build", "unit"]));

    let summary = pipeline.run().await.unwrap();

    assert!(summary.conflicted_files.is_empty());
    assert!(summary.resolved_files.is_empty());
    assert_eq!(summary.pull_request.as_ref().unwrap().number, PR_NUMBER);
    assert!(summary.branch.starts_with("ai-rebase-"));

    // Only the PR description goes through the model.
    assert!(h.ai.resolved.lock().unwrap().is_empty());
    assert_eq!(*h.ai.commit_messages.lock().unwrap(), 0);
    assert_eq!(*h.ai.descriptions.lock().unwrap(), 1);
    assert!(!h.git.calls().iter().any(|c| c == "commit"));

    let created = h.code_host.created.lock().unwrap().clone();
    assert_eq!(created.len(), 1);
    assert!(created[0].title.starts_with("AI-assisted rebase - "));
    assert_eq!(created[0].head, summary.branch);
    assert_eq!(created[0].base, "main");

    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].level, NotificationLevel::Success);
    assert!(messages[0].message.contains("no conflicts"));
    assert!(dir_is_empty(root.path()));
}

#[tokio::test]
async fn test_phases_run_in_order() {
    let root = TempDir::new().unwrap();
    let h = Harness::new(
        MockGit::clean().with_conflict("main.go", CONFLICTED_MAIN_GO),
        ScriptedTests::default(),
    );
    let pipeline = h.pipeline(settings(root.path(), &["unit"]));
    let summary = pipeline.run().await.unwrap();

    let calls = h.git.calls();
    let expected_prefix = [
        "clone https://github.com/acme/firmware.git".to_string(),
        "add_remote upstream https://github.com/upstream/firmware.git".to_string(),
        "fetch".to_string(),
        format!("create_branch {}", summary.branch),
        "rebase upstream/main".to_string(),
        "stage main.go".to_string(),
        "commit".to_string(),
        format!("push {}", summary.branch),
    ];
    assert_eq!(calls, expected_prefix);
}

#[tokio::test]
async fn test_conflicts_resolved_and_reported() {
    let root = TempDir::new().unwrap();
    let h = Harness::new(
        MockGit::clean()
            .with_conflict("main.go", CONFLICTED_MAIN_GO)
            .with_conflict("board/Kconfig", "<<<<<<< HEAD\na\n=======\nb\n>>>>>>> up\n"),
        ScriptedTests::default(),
    );
    let pipeline = h.pipeline(settings(root.path(), &["unit"]));

    let summary = pipeline.run().await.unwrap();

    assert_eq!(summary.conflicted_files.len(), 2);
    assert_eq!(summary.resolved_files, summary.conflicted_files);
    assert_eq!(h.git.commits.lock().unwrap().len(), 1);
    assert_eq!(h.git.staged.lock().unwrap().len(), 2);

    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0]
        .message
        .contains("Resolved 2 conflicts in files: main.go, board/Kconfig"));
    assert!(messages[0].message.contains(&format!("PR #{}", PR_NUMBER)));
}

#[tokio::test]
async fn test_resolution_is_staged_verbatim() {
    let root = TempDir::new().unwrap();
    let mut h = Harness::new(
        MockGit::clean().with_conflict("main.go", CONFLICTED_MAIN_GO),
        ScriptedTests::default(),
    );
    h.ai = Arc::new(StubAi::answering("package main\nfunc main() {}"));
    let pipeline = h.pipeline(settings(root.path(), &[]));

    pipeline.run().await.unwrap();

    let staged = h.git.staged.lock().unwrap().clone();
    assert_eq!(
        staged,
        vec![(
            std::path::PathBuf::from("main.go"),
            "package main\nfunc main() {}".to_string()
        )]
    );
}

#[tokio::test]
async fn test_unexpected_rebase_error_is_fatal() {
    let root = TempDir::new().unwrap();
    let git = MockGit {
        rebase_stderr: Some("fatal: invalid upstream 'upstream/main'".into()),
        ..MockGit::clean()
    };
    let h = Harness::new(git, ScriptedTests::default());
    let pipeline = h.pipeline(settings(root.path(), &["unit"]));

    let err = pipeline.run().await.unwrap_err();
    match &err {
        PipelineError::Rebase(RebaseError::Unexpected { onto, source }) => {
            assert_eq!(onto, "upstream/main");
            assert!(matches!(source, GitError::CommandFailed { .. }));
        }
        other => panic!("expected an unexpected rebase error, got {other:?}"),
    }

    // Nothing after the rebase ran.
    assert_eq!(*h.git.listed.lock().unwrap(), 0);
    assert!(h.ai.resolved.lock().unwrap().is_empty());
    assert!(h.tests.ran.lock().unwrap().is_empty());
    assert!(h.git.pushed.lock().unwrap().is_empty());

    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].level, NotificationLevel::Error);
    assert_eq!(messages[0].title, "AI Rebaser - Git Rebase Failed");
    assert!(messages[0].message.contains("invalid upstream"));
    assert!(dir_is_empty(root.path()));
}

#[tokio::test]
async fn test_conflict_in_rebase_error_text_proceeds_to_resolution() {
    let root = TempDir::new().unwrap();
    let git = MockGit {
        rebase_stderr: Some("CONFLICT (content): Merge conflict in main.go".into()),
        ..MockGit::clean().with_conflict("main.go", CONFLICTED_MAIN_GO)
    };
    let h = Harness::new(git, ScriptedTests::default());
    let pipeline = h.pipeline(settings(root.path(), &["unit"]));

    let summary = pipeline.run().await.unwrap();

    assert_eq!(*h.git.listed.lock().unwrap(), 1);
    assert_eq!(summary.conflicted_files, vec![std::path::PathBuf::from("main.go")]);
    assert_eq!(summary.resolved_files, summary.conflicted_files);
    assert_eq!(h.git.commits.lock().unwrap().len(), 1);
    assert_eq!(h.notifier.messages()[0].level, NotificationLevel::Success);
}

#[tokio::test]
async fn test_failing_tests_abort_before_publish() {
    let root = TempDir::new().unwrap();
    let h = Harness::new(
        MockGit::clean().with_conflict("main.go", CONFLICTED_MAIN_GO),
        ScriptedTests::failing(&["unit", "lint"]),
    );
    let pipeline = h.pipeline(settings(root.path(), &["build", "unit", "lint"]));

    let err = pipeline.run().await.unwrap_err();
    match &err {
        PipelineError::Test(failure) => {
            assert_eq!(failure.failed, vec!["unit".to_string(), "lint".to_string()])
        }
        other => panic!("expected a test failure, got {other:?}"),
    }

    // Every command still ran.
    assert_eq!(h.tests.ran.lock().unwrap().len(), 3);
    assert!(h.git.pushed.lock().unwrap().is_empty());
    assert!(h.code_host.created.lock().unwrap().is_empty());

    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].level, NotificationLevel::Error);
    assert_eq!(messages[0].title, "AI Rebaser - Tests Failed");
    assert!(messages[0].message.contains("unit, lint"));
    assert!(dir_is_empty(root.path()));
}

#[tokio::test]
async fn test_clone_failure_falls_back_to_fetch() {
    let root = TempDir::new().unwrap();
    let git = MockGit {
        fail_clone: true,
        ..MockGit::clean()
    };
    let h = Harness::new(git, ScriptedTests::default());
    let pipeline = h.pipeline(settings(root.path(), &[]));

    pipeline.run().await.unwrap();

    let calls = h.git.calls();
    assert!(calls[0].starts_with("clone "));
    assert_eq!(calls[1], "fetch");
    assert!(calls.iter().any(|c| c.starts_with("push ")));
}

#[tokio::test]
async fn test_reviewer_failure_is_not_fatal() {
    let root = TempDir::new().unwrap();
    let mut h = Harness::new(MockGit::clean(), ScriptedTests::default());
    h.code_host = Arc::new(StubCodeHost {
        fail_reviewers: true,
        ..Default::default()
    });
    let mut s = settings(root.path(), &[]);
    s.reviewers = vec!["octocat".into()];
    let pipeline = h.pipeline(s);

    let summary = pipeline.run().await.unwrap();
    assert_eq!(summary.pull_request.unwrap().number, PR_NUMBER);

    let requests = h.code_host.reviewer_requests.lock().unwrap().clone();
    assert_eq!(
        requests,
        vec![(
            PR_NUMBER,
            vec!["octocat".to_string()],
            vec!["acme/firmware-team".to_string()]
        )]
    );
    assert_eq!(h.notifier.messages()[0].level, NotificationLevel::Success);
}

#[tokio::test]
async fn test_no_reviewers_configured_skips_request() {
    let root = TempDir::new().unwrap();
    let h = Harness::new(MockGit::clean(), ScriptedTests::default());
    let mut s = settings(root.path(), &[]);
    s.reviewers_team = None;
    let pipeline = h.pipeline(s);

    pipeline.run().await.unwrap();
    assert!(h.code_host.reviewer_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_notification_failure_does_not_fail_the_run() {
    let root = TempDir::new().unwrap();
    let mut h = Harness::new(MockGit::clean(), ScriptedTests::default());
    h.notifier = Arc::new(RecordingNotifier {
        fail: true,
        ..Default::default()
    });
    let pipeline = h.pipeline(settings(root.path(), &[]));

    let summary = pipeline.run().await.unwrap();

    assert_eq!(summary.pull_request.unwrap().number, PR_NUMBER);
    assert_eq!(h.notifier.messages().len(), 1);
    assert!(!pipeline.is_running());
}

#[tokio::test]
async fn test_notification_failure_keeps_the_phase_error() {
    let root = TempDir::new().unwrap();
    let mut h = Harness::new(MockGit::clean(), ScriptedTests::failing(&["unit"]));
    h.notifier = Arc::new(RecordingNotifier {
        fail: true,
        ..Default::default()
    });
    let pipeline = h.pipeline(settings(root.path(), &["unit"]));

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::Test(_)));
    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].title, "AI Rebaser - Tests Failed");
    assert!(dir_is_empty(root.path()));
}

#[tokio::test]
async fn test_dry_run_skips_push_and_pr() {
    let root = TempDir::new().unwrap();
    let h = Harness::new(
        MockGit::clean().with_conflict("main.go", CONFLICTED_MAIN_GO),
        ScriptedTests::default(),
    );
    let mut s = settings(root.path(), &["unit"]);
    s.dry_run = true;
    let pipeline = h.pipeline(s);

    let summary = pipeline.run().await.unwrap();

    assert!(summary.dry_run);
    assert!(summary.pull_request.is_none());
    assert_eq!(summary.commits, 1);
    assert!(h.git.pushed.lock().unwrap().is_empty());
    assert!(h.code_host.created.lock().unwrap().is_empty());
    assert_eq!(*h.ai.descriptions.lock().unwrap(), 0);

    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].level, NotificationLevel::Info);
    assert!(messages[0].message.contains(&summary.branch));
}

#[tokio::test]
async fn test_keep_artifacts_leaves_working_directory() {
    let root = TempDir::new().unwrap();
    let h = Harness::new(MockGit::clean(), ScriptedTests::default());
    let mut s = settings(root.path(), &[]);
    s.keep_artifacts = true;
    let pipeline = h.pipeline(s);

    pipeline.run().await.unwrap();

    let kept: Vec<_> = std::fs::read_dir(root.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(kept.len(), 1);
    assert!(kept[0].starts_with("rebaiser-"));
}

#[tokio::test]
async fn test_panic_in_run_still_removes_working_directory() {
    let root = TempDir::new().unwrap();
    let tests = ScriptedTests {
        panic: true,
        ..Default::default()
    };
    let h = Harness::new(MockGit::clean(), tests);
    let pipeline = Arc::new(h.pipeline(settings(root.path(), &["unit"])));

    let task = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.run().await })
    };
    let join = task.await;

    assert!(join.unwrap_err().is_panic());
    assert!(dir_is_empty(root.path()));
    assert!(!pipeline.is_running());
}

/// Blocks inside the test phase until released.
struct GatedTests {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl TestRunner for GatedTests {
    async fn run_command(
        &self,
        _checkout: &Path,
        command: &TestCommand,
    ) -> Result<CommandResult, TestRunError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(CommandResult {
            name: command.name.clone(),
            success: true,
            exit_code: Some(0),
            output: String::new(),
            duration: std::time::Duration::ZERO,
            timed_out: false,
        })
    }
}

#[tokio::test]
async fn test_overlapping_runs_are_rejected() {
    let root = TempDir::new().unwrap();
    let h = Harness::new(MockGit::clean(), ScriptedTests::default());
    let gate = Arc::new(GatedTests {
        entered: Notify::new(),
        release: Notify::new(),
    });
    let mut services = h.services();
    services.tests = gate.clone();
    let pipeline = Arc::new(Pipeline::new(settings(root.path(), &["unit"]), services));

    let first = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.run().await })
    };
    gate.entered.notified().await;
    assert!(pipeline.is_running());

    let err = pipeline.run().await.unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyRunning));

    gate.release.notify_one();
    first.await.unwrap().unwrap();
    assert!(!pipeline.is_running());

    // The rejected run sent nothing; only the finished run notified.
    assert_eq!(h.notifier.messages().len(), 1);
}

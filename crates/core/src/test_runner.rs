//! Validation commands run against the rebased checkout.
//!
//! A [`TestRunner`] executes one [`TestCommand`]; [`run_suite`] runs the
//! configured list in order and folds the per-command results into a
//! [`TestOutcome`]. A failing command never stops the suite.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::errors::TestRunError;

/// One validation command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCommand {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    /// Relative to the checkout root when not absolute.
    pub working_dir: Option<PathBuf>,
    pub environment: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// Result of running one command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub name: String,
    pub success: bool,
    /// `None` when the process was killed or never started.
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr.
    pub output: String,
    pub duration: Duration,
    pub timed_out: bool,
}

/// Aggregate result of a suite run.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub success: bool,
    pub results: Vec<CommandResult>,
    pub duration: Duration,
}

impl TestOutcome {
    /// Names of the failed commands, in run order.
    pub fn failed_names(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.name.clone())
            .collect()
    }
}

#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Run `command` with `checkout` as the base directory.
    async fn run_command(
        &self,
        checkout: &Path,
        command: &TestCommand,
    ) -> Result<CommandResult, TestRunError>;
}

// ---------------------------------------------------------------------------
// Process runner
// ---------------------------------------------------------------------------

/// Runs commands as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TestRunner for ProcessRunner {
    #[instrument(skip(self, checkout, command), fields(name = %command.name))]
    async fn run_command(
        &self,
        checkout: &Path,
        command: &TestCommand,
    ) -> Result<CommandResult, TestRunError> {
        let dir = match &command.working_dir {
            Some(wd) => checkout.join(wd),
            None => checkout.to_path_buf(),
        };

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(&dir)
            .envs(&command.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            program = %command.program,
            args = ?command.args,
            dir = %dir.display(),
            "running test command"
        );

        let started = Instant::now();
        let child = cmd.spawn().map_err(|source| TestRunError::SpawnFailed {
            name: command.name.clone(),
            source,
        })?;

        match tokio::time::timeout(command.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                let success = output.status.success();
                let exit_code = output.status.code();
                if success {
                    info!(duration_ms = started.elapsed().as_millis() as u64, "test command passed");
                } else {
                    warn!(?exit_code, "test command failed");
                }
                Ok(CommandResult {
                    name: command.name.clone(),
                    success,
                    exit_code,
                    output: combined,
                    duration: started.elapsed(),
                    timed_out: false,
                })
            }
            Ok(Err(source)) => Err(TestRunError::SpawnFailed {
                name: command.name.clone(),
                source,
            }),
            Err(_) => {
                // The child future was dropped, and with it the process.
                warn!(timeout_secs = command.timeout.as_secs(), "test command timed out");
                Ok(CommandResult {
                    name: command.name.clone(),
                    success: false,
                    exit_code: None,
                    output: format!("timed out after {}s", command.timeout.as_secs()),
                    duration: started.elapsed(),
                    timed_out: true,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Suite
// ---------------------------------------------------------------------------

/// Run every command in order. Errors starting a command count as failures.
pub async fn run_suite(
    runner: &dyn TestRunner,
    checkout: &Path,
    commands: &[TestCommand],
) -> TestOutcome {
    let started = Instant::now();
    let mut results = Vec::with_capacity(commands.len());

    for command in commands {
        let result = match runner.run_command(checkout, command).await {
            Ok(result) => result,
            Err(e) => {
                warn!(name = %command.name, error = %e, "test command could not be run");
                CommandResult {
                    name: command.name.clone(),
                    success: false,
                    exit_code: None,
                    output: e.to_string(),
                    duration: Duration::ZERO,
                    timed_out: false,
                }
            }
        };
        results.push(result);
    }

    let success = results.iter().all(|r| r.success);
    info!(
        total = results.len(),
        failed = results.iter().filter(|r| !r.success).count(),
        "test suite finished"
    );

    TestOutcome {
        success,
        results,
        duration: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(name: &str, script: &str) -> TestCommand {
        TestCommand {
            name: name.into(),
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            working_dir: None,
            environment: BTreeMap::new(),
            timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_empty_suite_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_suite(&ProcessRunner::new(), dir.path(), &[]).await;
        assert!(outcome.success);
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_suite() {
        let dir = tempfile::tempdir().unwrap();
        let commands = vec![
            sh("first", "exit 3"),
            sh("second", "echo ok"),
            TestCommand {
                program: "/definitely/not/a/binary".into(),
                ..sh("missing", "")
            },
        ];
        let outcome = run_suite(&ProcessRunner::new(), dir.path(), &commands).await;

        assert!(!outcome.success);
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.results[0].exit_code, Some(3));
        assert!(outcome.results[1].success);
        assert!(outcome.results[1].output.contains("ok"));
        assert_eq!(outcome.failed_names(), vec!["first", "missing"]);
    }

    #[tokio::test]
    async fn test_environment_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut cmd = sh("env", "test \"$REBASE_CHECK\" = yes && test \"$(basename \"$PWD\")\" = sub");
        cmd.environment.insert("REBASE_CHECK".into(), "yes".into());
        cmd.working_dir = Some(PathBuf::from("sub"));

        let result = ProcessRunner::new()
            .run_command(dir.path(), &cmd)
            .await
            .unwrap();
        assert!(result.success, "output: {}", result.output);
    }

    #[tokio::test]
    async fn test_timeout_is_a_failed_result() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd = sh("slow", "sleep 5");
        cmd.timeout = Duration::from_millis(100);

        let result = ProcessRunner::new()
            .run_command(dir.path(), &cmd)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.timed_out);
        assert_eq!(result.exit_code, None);
    }
}

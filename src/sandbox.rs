//! Staging-area test of a candidate script.
//!
//! Each project has one lab directory. A run clears it, seeds it with the
//! snapshot's environment files, copies the candidate file beside them under
//! its counter-qualified name, and executes the candidate from inside the lab.
//! This is a separate directory, not an isolation boundary.

use crate::backup::BackupSnapshot;
use crate::error::Result;
use crate::exec::{ExecutionResult, ScriptExecutor};
use crate::project::Project;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Outcome of running a candidate in the lab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxResult {
    pub succeeded: bool,
    /// Path of the candidate inside the lab.
    pub script: PathBuf,
    /// `None` when the candidate could not be started.
    pub execution: Option<ExecutionResult>,
}

/// Runs candidates in a project's lab directory.
pub struct SandboxRunner<'a> {
    executor: &'a dyn ScriptExecutor,
}

impl<'a> SandboxRunner<'a> {
    #[must_use]
    pub fn new(executor: &'a dyn ScriptExecutor) -> Self {
        Self { executor }
    }

    /// Stage and run `candidate` for cycle `counter`.
    ///
    /// Success is exactly "the candidate exited 0"; a non-zero exit, a
    /// timeout, or a failure to start all yield `succeeded = false`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error only if the lab cannot be prepared.
    pub async fn run(
        &self,
        project: &Project,
        snapshot: &BackupSnapshot,
        candidate: &Path,
        counter: u32,
    ) -> Result<SandboxResult> {
        let lab = project.lab_dir();
        if lab.exists() {
            fs::remove_dir_all(&lab)?;
        }
        fs::create_dir_all(&lab)?;

        for file in snapshot.environment_files() {
            if let Some(name) = file.file_name() {
                fs::copy(&file, lab.join(name))?;
            }
        }

        let script = lab.join(project.candidate_file_name(counter));
        fs::copy(candidate, &script)?;
        info!("Testing candidate {} in {}", script.display(), lab.display());

        let execution = match self.executor.execute(&script, &lab).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("Candidate could not be started: {}", e);
                None
            }
        };
        let succeeded = execution.as_ref().is_some_and(ExecutionResult::success);
        info!(
            "Candidate {}",
            if succeeded { "passed" } else { "failed" }
        );

        Ok(SandboxResult {
            succeeded,
            script,
            execution,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupStore;
    use crate::exec::{ExecutionConfig, InterpreterExecutor};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Project, BackupSnapshot) {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("app");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("job.sh"), "exit 1\n").unwrap();
        fs::write(src.join("input.txt"), "payload\n").unwrap();
        let project = Project::open(&temp.path().join("Projects"), &src.join("job.sh")).unwrap();
        let snapshot = BackupStore::new()
            .snapshot(project.script(), &project, 1)
            .unwrap();
        (temp, project, snapshot)
    }

    fn candidate(temp: &TempDir, body: &str) -> PathBuf {
        let path = temp.path().join("candidate.sh");
        fs::write(&path, body).unwrap();
        path
    }

    fn sh() -> InterpreterExecutor {
        InterpreterExecutor::new(ExecutionConfig {
            interpreter: vec!["sh".to_string()],
            timeout_secs: Some(10),
        })
    }

    #[tokio::test]
    async fn test_succeeding_candidate() {
        let (temp, project, snapshot) = setup();
        let executor = sh();

        let result = SandboxRunner::new(&executor)
            .run(&project, &snapshot, &candidate(&temp, "cat input.txt\nexit 0\n"), 1)
            .await
            .unwrap();

        assert!(result.succeeded);
        assert_eq!(result.script, project.lab_dir().join("jobFix1.sh"));
        assert_eq!(result.execution.unwrap().stdout, "payload\n");
    }

    #[tokio::test]
    async fn test_failing_candidate() {
        let (temp, project, snapshot) = setup();
        let executor = sh();

        let result = SandboxRunner::new(&executor)
            .run(&project, &snapshot, &candidate(&temp, "exit 2\n"), 1)
            .await
            .unwrap();
        assert!(!result.succeeded);
        assert_eq!(result.execution.unwrap().exit_code, Some(2));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_sandbox_failure() {
        let (temp, project, snapshot) = setup();
        let executor = InterpreterExecutor::new(ExecutionConfig {
            interpreter: vec!["fixloop-no-such-interpreter".to_string()],
            timeout_secs: None,
        });

        let result = SandboxRunner::new(&executor)
            .run(&project, &snapshot, &candidate(&temp, "exit 0\n"), 1)
            .await
            .unwrap();
        assert!(!result.succeeded);
        assert!(result.execution.is_none());
    }

    #[tokio::test]
    async fn test_lab_is_reset_between_runs() {
        let (temp, project, snapshot) = setup();
        let executor = sh();
        let runner = SandboxRunner::new(&executor);

        runner
            .run(&project, &snapshot, &candidate(&temp, "echo x > leftover.txt\n"), 1)
            .await
            .unwrap();
        assert!(project.lab_dir().join("leftover.txt").exists());

        runner.run(&project, &snapshot, &candidate(&temp, "exit 0\n"), 2).await.unwrap();
        assert!(!project.lab_dir().join("leftover.txt").exists());
        assert!(!project.lab_dir().join("jobFix1.sh").exists());
        assert!(project.lab_dir().join("jobFix2.sh").exists());
        assert!(project.lab_dir().join("input.txt").exists());
    }

    #[tokio::test]
    async fn test_working_script_is_untouched() {
        let (temp, project, snapshot) = setup();
        let before = fs::read(project.script()).unwrap();
        let executor = sh();

        SandboxRunner::new(&executor)
            .run(&project, &snapshot, &candidate(&temp, "exit 0\n"), 1)
            .await
            .unwrap();
        assert_eq!(fs::read(project.script()).unwrap(), before);
    }
}

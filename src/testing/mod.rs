//! Testing infrastructure for fixloop.
//!
//! This module provides mocks, fixtures, and assertions for exercising the
//! repair cycle without a real interpreter, model server, or operator.
//!
//! # Architecture
//!
//! - **Mocks**: Test doubles for [`crate::exec::ScriptExecutor`] and
//!   [`crate::promotion::OperatorPrompt`] with queued, controllable behavior
//! - **Fixtures**: Temporary workspaces holding a working script (test-only)
//! - **Assertions**: Checks over scripts, snapshots, and bug-fix folders
//!
//! # Example
//!
//! ```rust,ignore
//! use fixloop::testing::{MockScriptExecutor, ScriptedPrompt};
//!
//! let executor = MockScriptExecutor::new()
//!     .with_failure(1, "Traceback (most recent call last):")
//!     .with_exit_code(0);
//!
//! let prompt = ScriptedPrompt::new(["yes"]);
//! ```

pub mod assertions;
#[cfg(test)]
pub mod fixtures;
pub mod mocks;

// Re-export commonly used types
pub use assertions::*;
#[cfg(test)]
pub use fixtures::*;
pub use mocks::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FixloopError;
    use crate::exec::ScriptExecutor;
    use crate::promotion::OperatorPrompt;
    use std::path::Path;

    // =========================================================================
    // Mock Script Executor Tests
    // =========================================================================

    #[tokio::test]
    async fn test_mock_executor_default_succeeds() {
        let executor = MockScriptExecutor::default();
        let result = executor.execute(Path::new("a.py"), Path::new(".")).await.unwrap();
        assert!(result.success());
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_executor_replays_queue_in_order() {
        let executor = MockScriptExecutor::new()
            .with_failure(2, "boom")
            .with_timeout();

        let first = executor.execute(Path::new("a.py"), Path::new("/w")).await.unwrap();
        assert_eq!(first.exit_code, Some(2));
        assert_eq!(first.stderr, "boom");

        let second = executor.execute(Path::new("b.py"), Path::new("/lab")).await.unwrap();
        assert!(second.timed_out);
        assert!(!second.success());

        let third = executor.execute(Path::new("c.py"), Path::new("/w")).await.unwrap();
        assert!(third.success());

        let calls = executor.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].cwd, Path::new("/lab"));
    }

    #[tokio::test]
    async fn test_mock_executor_spawn_error() {
        let executor = MockScriptExecutor::new().with_spawn_error("no such file");
        let err = executor
            .execute(Path::new("a.py"), Path::new("."))
            .await
            .unwrap_err();
        assert!(matches!(err, FixloopError::Spawn { .. }));
        assert_eq!(executor.call_count(), 1);
    }

    #[test]
    fn test_mock_executor_missing_interpreter() {
        assert!(MockScriptExecutor::new().check_available().is_ok());
        let err = MockScriptExecutor::new()
            .with_missing_interpreter()
            .check_available()
            .unwrap_err();
        assert!(matches!(err, FixloopError::MissingInterpreter { .. }));
    }

    // =========================================================================
    // Scripted Prompt Tests
    // =========================================================================

    #[tokio::test]
    async fn test_scripted_prompt_answers_then_declines() {
        let prompt = ScriptedPrompt::new(["yes"]);
        assert_eq!(prompt.ask("first?").await.unwrap(), "yes");
        assert_eq!(prompt.ask("second?").await.unwrap(), "no");
        assert_eq!(prompt.questions(), vec!["first?", "second?"]);
    }

    // =========================================================================
    // Fixture Tests (only available in test builds)
    // =========================================================================

    #[test]
    fn test_workspace_has_script_and_sibling() {
        let ws = TestWorkspace::failing_shell_script();
        assert!(ws.script().is_file());
        assert!(ws.script().with_file_name("data.txt").is_file());
        assert_eq!(ws.project().name(), "job");
    }

    #[test]
    fn test_workspace_hash_tracks_writes() {
        let ws = TestWorkspace::with_script("job.sh", "exit 0\n");
        let before = ws.script_hash();
        assert_unchanged(ws.script(), &before);
        ws.write_script("exit 1\n");
        assert_ne!(ws.script_hash(), before);
    }
}

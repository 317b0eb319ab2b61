//! Mock implementations of the pipeline's collaborator traits.
//!
//! These mocks provide controllable test doubles for script execution and
//! the operator prompt, enabling deterministic cycle tests. The chat mock,
//! [`crate::llm::MockChatClient`], lives beside its trait.

use crate::error::{FixloopError, Result};
use crate::exec::{ExecutionResult, ScriptExecutor};
use crate::promotion::OperatorPrompt;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// One recorded call to [`MockScriptExecutor::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionCall {
    pub script: PathBuf,
    pub cwd: PathBuf,
}

/// Mock script executor.
///
/// Results come from a queue; once it is empty every call exits 0.
///
/// # Example
///
/// ```rust,ignore
/// let executor = MockScriptExecutor::new()
///     .with_failure(1, "NameError: name 'x' is not defined")
///     .with_exit_code(0);
/// ```
#[derive(Debug, Default)]
pub struct MockScriptExecutor {
    results: Mutex<VecDeque<ExecutionResult>>,
    spawn_error: Option<String>,
    interpreter_missing: bool,
    calls: Mutex<Vec<ExecutionCall>>,
    call_count: AtomicU32,
}

impl MockScriptExecutor {
    /// Create a new mock whose runs all succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a run with the given exit code and no output.
    #[must_use]
    pub fn with_exit_code(self, code: i32) -> Self {
        self.with_result(ExecutionResult {
            exit_code: Some(code),
            ..ExecutionResult::default()
        })
    }

    /// Queue a failing run with the given stderr.
    #[must_use]
    pub fn with_failure(self, code: i32, stderr: &str) -> Self {
        self.with_result(ExecutionResult {
            exit_code: Some(code),
            stderr: stderr.to_string(),
            ..ExecutionResult::default()
        })
    }

    /// Queue a run that hit the timeout.
    #[must_use]
    pub fn with_timeout(self) -> Self {
        self.with_result(ExecutionResult {
            timed_out: true,
            ..ExecutionResult::default()
        })
    }

    /// Queue an arbitrary result.
    #[must_use]
    pub fn with_result(self, result: ExecutionResult) -> Self {
        if let Ok(mut results) = self.results.lock() {
            results.push_back(result);
        }
        self
    }

    /// Fail every call with a spawn error.
    #[must_use]
    pub fn with_spawn_error(mut self, message: &str) -> Self {
        self.spawn_error = Some(message.to_string());
        self
    }

    /// Report the interpreter as missing from `check_available`.
    #[must_use]
    pub fn with_missing_interpreter(mut self) -> Self {
        self.interpreter_missing = true;
        self
    }

    /// Number of `execute` calls so far.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every `execute` call, in order.
    pub fn calls(&self) -> Vec<ExecutionCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ScriptExecutor for MockScriptExecutor {
    async fn execute(&self, script: &Path, cwd: &Path) -> Result<ExecutionResult> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ExecutionCall {
                script: script.to_path_buf(),
                cwd: cwd.to_path_buf(),
            });
        }

        if let Some(ref message) = self.spawn_error {
            return Err(FixloopError::Spawn {
                program: "mock".to_string(),
                message: message.clone(),
            });
        }

        let queued = self.results.lock().ok().and_then(|mut r| r.pop_front());
        Ok(queued.unwrap_or(ExecutionResult {
            exit_code: Some(0),
            ..ExecutionResult::default()
        }))
    }

    fn check_available(&self) -> Result<()> {
        if self.interpreter_missing {
            return Err(FixloopError::MissingInterpreter {
                interpreter: "mock".to_string(),
            });
        }
        Ok(())
    }
}

/// Operator prompt that replays queued answers, then answers "no".
///
/// # Example
///
/// ```rust,ignore
/// let prompt = ScriptedPrompt::new(["yes", "no"]);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<String>>,
    questions: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    #[must_use]
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            questions: Mutex::new(Vec::new()),
        }
    }

    /// Every question asked so far.
    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl OperatorPrompt for ScriptedPrompt {
    async fn ask(&self, question: &str) -> anyhow::Result<String> {
        if let Ok(mut questions) = self.questions.lock() {
            questions.push(question.to_string());
        }
        let answer = self.answers.lock().ok().and_then(|mut a| a.pop_front());
        Ok(answer.unwrap_or_else(|| "no".to_string()))
    }
}

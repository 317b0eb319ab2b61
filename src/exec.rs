//! Script execution through a configured interpreter.

use crate::error::{FixloopError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command as AsyncCommand;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How scripts are run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Interpreter program followed by its leading arguments.
    #[serde(default = "default_interpreter")]
    pub interpreter: Vec<String>,

    /// Kill the script after this many seconds; `None` waits forever.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: Option<u64>,
}

fn default_interpreter() -> Vec<String> {
    vec!["python3".to_string()]
}

fn default_timeout_secs() -> Option<u64> {
    Some(300)
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ExecutionConfig {
    /// Interpreter from a single command line, split on whitespace.
    #[must_use]
    pub fn with_interpreter_command(mut self, command: &str) -> Self {
        self.interpreter = command.split_whitespace().map(str::to_string).collect();
        self
    }
}

const TIMEOUT_NOTE: &str = "Script timed out before finishing.";

/// How long a killed script's pipes are drained before giving up on them.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Outcome of one script run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionResult {
    /// `None` when the process was killed by a signal or timed out.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecutionResult {
    /// True only for a clean exit with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Error text for the fix request. A timeout keeps whatever stderr the
    /// script wrote and appends a note.
    #[must_use]
    pub fn error_output(&self) -> String {
        if !self.timed_out {
            return self.stderr.clone();
        }
        if self.stderr.trim().is_empty() {
            TIMEOUT_NOTE.to_string()
        } else {
            format!("{}\n{}", self.stderr.trim_end(), TIMEOUT_NOTE)
        }
    }
}

/// Runs a script file to completion.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Run `script` with `cwd` as the working directory.
    ///
    /// A non-zero exit is a normal result, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`FixloopError::Spawn`] if the process cannot be started.
    async fn execute(&self, script: &Path, cwd: &Path) -> Result<ExecutionResult>;

    /// Confirm the executor can run at all.
    ///
    /// # Errors
    ///
    /// Returns [`FixloopError::MissingInterpreter`] when the program is absent.
    fn check_available(&self) -> Result<()> {
        Ok(())
    }
}

/// Executor that runs `<interpreter...> <script>` as a child process.
#[derive(Debug, Clone)]
pub struct InterpreterExecutor {
    config: ExecutionConfig,
}

impl InterpreterExecutor {
    #[must_use]
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    fn program(&self) -> &str {
        self.config
            .interpreter
            .first()
            .map_or("", String::as_str)
    }
}

#[async_trait]
impl ScriptExecutor for InterpreterExecutor {
    async fn execute(&self, script: &Path, cwd: &Path) -> Result<ExecutionResult> {
        let program = self.program().to_string();
        let mut command = AsyncCommand::new(&program);
        command
            .args(self.config.interpreter.iter().skip(1))
            .arg(script)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running {} {} in {}", program, script.display(), cwd.display());
        let start = Instant::now();

        let mut child = command.spawn().map_err(|e| FixloopError::Spawn {
            program: program.clone(),
            message: e.to_string(),
        })?;
        let stdout = Capture::spawn(child.stdout.take());
        let stderr = Capture::spawn(child.stderr.take());

        let status = match self.config.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), child.wait())
                .await
                .ok(),
            None => Some(child.wait().await),
        };

        let Some(status) = status else {
            let secs = self.config.timeout_secs.unwrap_or_default();
            warn!("{} timed out after {}s", script.display(), secs);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {}: {}", script.display(), e);
            }
            // Grandchildren may still hold the pipes; keep what arrived.
            return Ok(ExecutionResult {
                exit_code: None,
                stdout: stdout.drain(DRAIN_GRACE).await,
                stderr: stderr.drain(DRAIN_GRACE).await,
                timed_out: true,
            });
        };
        let status = status.map_err(|e| FixloopError::Spawn {
            program: program.clone(),
            message: e.to_string(),
        })?;

        let result = ExecutionResult {
            exit_code: status.code(),
            stdout: stdout.finish().await,
            stderr: stderr.finish().await,
            timed_out: false,
        };
        debug!(
            "{} exited with {:?} after {}ms",
            script.display(),
            result.exit_code,
            start.elapsed().as_millis()
        );
        Ok(result)
    }

    fn check_available(&self) -> Result<()> {
        let program = self.program();
        which::which(program).map_err(|_| FixloopError::MissingInterpreter {
            interpreter: program.to_string(),
        })?;
        Ok(())
    }
}

/// Incrementally collected output of one child pipe.
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl Capture {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let task = tokio::spawn(async move {
            let Some(mut pipe) = pipe else { return };
            let mut chunk = [0u8; 4096];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut buf) = sink.lock() {
                            buf.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
            }
        });
        Self { buf, task }
    }

    /// Wait for end of stream and return everything read.
    async fn finish(mut self) -> String {
        let _ = (&mut self.task).await;
        self.text()
    }

    /// Wait at most `grace` for end of stream, then return what was read.
    async fn drain(mut self, grace: Duration) -> String {
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            self.task.abort();
        }
        self.text()
    }

    fn text(&self) -> String {
        self.buf
            .lock()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    }
}

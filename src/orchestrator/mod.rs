//! The repair-cycle state machine.
//!
//! One [`Orchestrator`] owns one project for its lifetime: the bug-fix
//! counter, the conversation, the project lock, and a cancellation token.
//! A cycle runs the working script and, only if it fails, records the error,
//! snapshots the script's folder, asks the model for a fix, parses it, tests
//! the candidate in the lab, and asks the operator before promoting it.
//!
//! ```text
//! Idle -> Running -> Success
//!                 -> Failed -> BackingUp -> RequestingFix -> ParsingFix
//!                      -> Skipped                        (no candidate)
//!                      -> Sandboxing -> Skipped          (candidate failed)
//!                      -> Sandboxing -> AwaitingPromotionDecision -> Promoted | Skipped
//! ```

pub mod artifacts;
pub mod state;

pub use state::{CycleOutcome, CycleReport, CycleState, RunSummary};

use crate::backup::BackupStore;
use crate::config::FixloopConfig;
use crate::conversation::ConversationStore;
use crate::error::{FixloopError, IntoFixloopError, Result};
use crate::exec::{ExecutionResult, InterpreterExecutor, ScriptExecutor};
use crate::llm::{create_chat_client, ChatClient};
use crate::project::{Project, ProjectLock};
use crate::promotion::{DeclinePrompt, OperatorPrompt, PromotionGate, StdinPrompt};
use crate::repair::{FixGenerator, FixProtocol, QueryRewriter, ResponseParser, Transcript};
use crate::sandbox::SandboxRunner;
use colored::Colorize;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Name of the last-error file written at the workspace root.
pub const WORKSPACE_ERROR_FILE: &str = "error.txt";

/// External collaborators of the orchestrator.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub chat: Arc<dyn ChatClient>,
    pub executor: Arc<dyn ScriptExecutor>,
    pub prompt: Arc<dyn OperatorPrompt>,
}

impl std::fmt::Debug for OrchestratorDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorDeps")
            .field("chat", &self.chat.model_name())
            .field("executor", &"<dyn ScriptExecutor>")
            .field("prompt", &"<dyn OperatorPrompt>")
            .finish()
    }
}

impl OrchestratorDeps {
    /// Create real dependencies for production use.
    ///
    /// With `no_promote`, every promotion is declined without asking.
    ///
    /// # Errors
    ///
    /// Returns [`FixloopError::Config`] if the chat client cannot be built.
    pub fn real(config: &FixloopConfig, no_promote: bool) -> Result<Self> {
        let chat: Arc<dyn ChatClient> = Arc::from(create_chat_client(&config.llm).into_fixloop_config()?);
        let prompt: Arc<dyn OperatorPrompt> = if no_promote {
            Arc::new(DeclinePrompt)
        } else {
            Arc::new(StdinPrompt)
        };
        Ok(Self {
            chat,
            executor: Arc::new(InterpreterExecutor::new(config.execution.clone())),
            prompt,
        })
    }
}

/// Drives repair cycles for one working script.
#[derive(Debug)]
pub struct Orchestrator {
    project: Project,
    deps: OrchestratorDeps,
    generator: FixGenerator,
    parser: ResponseParser,
    backups: BackupStore,
    conversation: ConversationStore,
    workspace_error: PathBuf,
    counter: u32,
    state: CycleState,
    cancel: CancellationToken,
    _lock: ProjectLock,
}

impl Orchestrator {
    /// Open the project for `script` and take its lock.
    ///
    /// The bug-fix counter starts one past the highest index already on disk.
    ///
    /// # Errors
    ///
    /// Returns [`FixloopError::MissingScript`], [`FixloopError::MissingInterpreter`],
    /// or [`FixloopError::ProjectLocked`], or an I/O error from the project folder.
    pub fn new(
        workspace: &Path,
        script: &Path,
        config: &FixloopConfig,
        deps: OrchestratorDeps,
    ) -> Result<Self> {
        let project = Project::open(&config.projects_root(workspace), script)?;
        deps.executor.check_available()?;
        let lock = project.lock()?;
        let counter = project.next_counter()?;

        let model = deps.chat.model_name().to_string();
        let protocol = FixProtocol::new(config.protocol.fence_language.clone());
        let parser = ResponseParser::new(&protocol);
        let generator = FixGenerator::new(
            protocol,
            model.clone(),
            config.llm.max_tokens,
            QueryRewriter::new(
                model,
                config.llm.rewrite_max_tokens,
                config.llm.rewrite_temperature,
            ),
            config.rewrite,
            Transcript::new(config.transcript_path(workspace)),
        );

        info!(
            "Project '{}' at {} (next bug-fix index {})",
            project.name(),
            project.root().display(),
            counter
        );

        Ok(Self {
            project,
            deps,
            generator,
            parser,
            backups: BackupStore::new(),
            conversation: ConversationStore::new(config.conversation.retention),
            workspace_error: workspace.join(WORKSPACE_ERROR_FILE),
            counter,
            state: CycleState::Idle,
            cancel: CancellationToken::new(),
            _lock: lock,
        })
    }

    /// Index the next cycle that reaches the model will use.
    #[must_use]
    pub fn bug_fix_counter(&self) -> u32 {
        self.counter
    }

    #[must_use]
    pub fn state(&self) -> CycleState {
        self.state
    }

    #[must_use]
    pub fn project(&self) -> &Project {
        &self.project
    }

    #[must_use]
    pub fn conversation(&self) -> &ConversationStore {
        &self.conversation
    }

    /// Token that aborts the in-flight stage when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn transition(&mut self, next: CycleState) {
        debug!("[bug-fix {}] {} -> {}", self.counter, self.state, next);
        self.state = next;
    }

    fn check_cancelled(&self, stage: CycleState) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(FixloopError::cancelled(stage.to_string()));
        }
        Ok(())
    }

    /// Run one repair cycle.
    ///
    /// # Errors
    ///
    /// Any error ends the cycle where it happened. A backup failure is
    /// fatal; a generation failure comes after the counter has advanced.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let cancel = self.cancel.clone();
        let script = self.project.script().to_path_buf();

        self.transition(CycleState::Idle);
        self.transition(CycleState::Running);
        println!("{} {}", "Running".cyan().bold(), script.display());
        let execution = guard(
            &cancel,
            CycleState::Running,
            self.deps.executor.execute(&script, self.project.script_dir()),
        )
        .await??;

        if execution.success() {
            self.transition(CycleState::Success);
            println!("{}", "Script executed successfully.".green());
            return Ok(CycleReport {
                counter: None,
                outcome: CycleOutcome::ScriptSucceeded,
                execution,
                snapshot: None,
                candidate: None,
            });
        }

        // Failed: record the error before anything else happens.
        let k = self.counter;
        self.transition(CycleState::Failed);
        match (execution.timed_out, execution.exit_code) {
            (true, _) => println!("{}", "Script timed out.".red()),
            (false, Some(code)) => println!("{} (exit code {})", "Script encountered an error.".red(), code),
            (false, None) => println!("{} (killed by signal)", "Script encountered an error.".red()),
        }
        let source = String::from_utf8_lossy(&std::fs::read(&script)?).into_owned();
        let report = self
            .generator
            .protocol()
            .user_message(&execution.error_output(), &source);
        let error_file =
            artifacts::write_error_reports(&self.project, k, &self.workspace_error, &report)?;
        println!("Error details saved to {}", error_file.display());

        self.check_cancelled(CycleState::BackingUp)?;
        self.transition(CycleState::BackingUp);
        let snapshot = self.backups.snapshot(&script, &self.project, k)?;
        println!("{} {}", "Backed up to".cyan(), snapshot.dir.display());

        self.transition(CycleState::RequestingFix);
        self.counter = k + 1;
        info!("Bug-fix counter advanced to {}", self.counter);

        println!("{}", "Asking the model for a fix...".cyan());
        let mut echo = |chunk: &str| {
            print!("{}", chunk.bright_green());
            let _ = std::io::stdout().flush();
        };
        let generated = guard(
            &cancel,
            CycleState::RequestingFix,
            self.generator.generate(
                self.deps.chat.as_ref(),
                &mut self.conversation,
                &report,
                &mut echo,
            ),
        )
        .await?
        .into_fixloop_generation()?;
        println!();

        if let Some(rewrite) = &generated.rewrite {
            println!(
                "{} {}",
                "Rewritten query:".magenta().bold(),
                rewrite.rewritten.magenta()
            );
        }
        artifacts::write_raw_output(&self.project, k, &generated.response)?;

        self.transition(CycleState::ParsingFix);
        let parsed = self.parser.parse(&generated.response);
        let Some(candidate) =
            artifacts::write_fix(&self.project, k, &parsed, &generated.response)?
        else {
            println!(
                "{}",
                "No runnable candidate in the response; saved it as the fix.".yellow()
            );
            self.transition(CycleState::Skipped);
            return Ok(CycleReport {
                counter: Some(k),
                outcome: CycleOutcome::NoCandidate,
                execution,
                snapshot: Some(snapshot.dir),
                candidate: None,
            });
        };

        self.transition(CycleState::Sandboxing);
        let runner = SandboxRunner::new(self.deps.executor.as_ref());
        let sandbox = guard(
            &cancel,
            CycleState::Sandboxing,
            runner.run(&self.project, &snapshot, &candidate, k),
        )
        .await??;

        let outcome = if sandbox.succeeded {
            println!("{}", "Candidate ran successfully in the lab.".green());
            if let Some(output) = sandbox.execution.as_ref().and_then(lab_output) {
                println!("{}", "Lab output:".cyan());
                println!("{}", output.dimmed());
            }
            self.transition(CycleState::AwaitingPromotionDecision);
            let gate = PromotionGate::new(self.deps.prompt.as_ref());
            let decision = guard(
                &cancel,
                CycleState::AwaitingPromotionDecision,
                gate.decide(&sandbox, &script),
            )
            .await??;
            CycleOutcome::from(decision)
        } else {
            println!("{}", "Candidate failed in the lab; not promoting.".red());
            CycleOutcome::SandboxFailed
        };

        match outcome {
            CycleOutcome::Promoted => println!("{} {}", "Promoted fix to".green().bold(), script.display()),
            CycleOutcome::Declined => println!("{}", "Kept the current script.".yellow()),
            _ => {}
        }
        self.transition(outcome.final_state());

        Ok(CycleReport {
            counter: Some(k),
            outcome,
            execution,
            snapshot: Some(snapshot.dir),
            candidate: Some(candidate),
        })
    }

    /// Run up to `max_cycles` cycles.
    ///
    /// Stops early when the script succeeds or a cycle errors. The error is
    /// reported here and returned in the summary.
    pub async fn run(&mut self, max_cycles: u32) -> RunSummary {
        let mut summary = RunSummary::default();

        for cycle in 1..=max_cycles.max(1) {
            debug!("Starting cycle {}/{}", cycle, max_cycles.max(1));
            match self.run_cycle().await {
                Ok(report) => {
                    let done = report.outcome == CycleOutcome::ScriptSucceeded;
                    summary.cycles.push(report);
                    if done {
                        break;
                    }
                }
                Err(e) => {
                    error!("Cycle aborted during {}: {}", self.state, e);
                    eprintln!("{} {}", "Error:".red().bold(), e);
                    summary.error = Some(e);
                    break;
                }
            }
        }

        summary
    }
}

/// Captured stdout then stderr of a lab run, or `None` if both are empty.
fn lab_output(execution: &ExecutionResult) -> Option<String> {
    let parts: Vec<&str> = [execution.stdout.trim_end(), execution.stderr.trim_end()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n"))
}

/// Race `fut` against cancellation.
async fn guard<T>(
    cancel: &CancellationToken,
    stage: CycleState,
    fut: impl Future<Output = T>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(FixloopError::cancelled(stage.to_string())),
        output = fut => Ok(output),
    }
}

//! fixloop - LLM-assisted script repair
//!
//! Runs a script and, when it fails, walks a guarded repair cycle: record the
//! error, snapshot the script's folder, ask a chat model for a fix, parse the
//! reply, test the candidate in an isolated lab folder, and overwrite the
//! working script only after the operator says yes.
//!
//! # Architecture
//!
//! - [`orchestrator`] - The repair-cycle state machine and its dependencies
//! - [`exec`] - Running scripts through an interpreter with a timeout
//! - [`backup`] - Verified snapshots of the script and its sibling files
//! - [`repair`] - Fix protocol, reply parsing, query rewriting, and generation
//! - [`llm`] - Chat clients for OpenAI-compatible endpoints
//! - [`conversation`] - Bounded conversation history
//! - [`sandbox`] - Lab execution of candidate fixes
//! - [`promotion`] - Operator approval and promotion
//! - [`project`] - Per-script folder layout, counters, and locking
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Custom error types and handling
//! - [`testing`] - Testing infrastructure (mocks, fixtures, assertions)
//!
//! # Example
//!
//! ```rust,ignore
//! use fixloop::{FixloopConfig, Orchestrator, OrchestratorDeps};
//!
//! let config = FixloopConfig::load(workspace)?;
//! let deps = OrchestratorDeps::real(&config, false)?;
//! let mut orchestrator = Orchestrator::new(workspace, script, &config, deps)?;
//!
//! let summary = orchestrator.run(1).await;
//! std::process::exit(summary.exit_code());
//! ```

pub mod backup;
pub mod config;
pub mod conversation;
pub mod error;
pub mod exec;
pub mod llm;
pub mod orchestrator;
pub mod project;
pub mod promotion;
pub mod repair;
pub mod sandbox;
pub mod testing;

// Re-export commonly used types
pub use error::{FixloopError, IntoFixloopError, Result};

pub use backup::{BackupSnapshot, BackupStore, RestoreReport, SnapshotManifest, SnapshotSummary};
pub use config::FixloopConfig;
pub use conversation::{ConversationStore, ConversationTurn, RetentionPolicy};
pub use exec::{ExecutionConfig, ExecutionResult, InterpreterExecutor, ScriptExecutor};
pub use llm::{ChatClient, ChatMessage, ChatRequest, ChatRole, LlmConfig, MockChatClient};
pub use orchestrator::{
    CycleOutcome, CycleReport, CycleState, Orchestrator, OrchestratorDeps, RunSummary,
};
pub use project::{Project, ProjectLock};
pub use promotion::{OperatorPrompt, PromotionDecision, PromotionGate};
pub use repair::{FixProtocol, ParsedFix, ResponseParser, RewriteMode};
pub use sandbox::{SandboxResult, SandboxRunner};

// Re-export testing types for convenience
pub use testing::{MockScriptExecutor, ScriptedPrompt};

//! fixloop - LLM-assisted script repair
//!
//! Runs a script and, when it fails, asks a chat model for a fix, tests the
//! fix in a lab folder, and promotes it only with the operator's consent.

use clap::{Parser, Subcommand};
use colored::Colorize;
use fixloop::{
    BackupStore, CycleOutcome, FixloopConfig, Orchestrator, OrchestratorDeps, Project, Result,
};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Parser)]
#[command(name = "fixloop")]
#[command(version)]
#[command(about = "Repair failing scripts with a chat model, one approved fix at a time", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Workspace directory holding settings, the transcript, and Projects/
    #[arg(short, long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit log records as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script and repair it if it fails
    Run {
        /// The working script
        script: PathBuf,

        /// Model identifier sent to the chat endpoint
        #[arg(long, value_name = "MODEL")]
        model: Option<String>,

        /// File that receives every streamed model reply
        #[arg(long, value_name = "PATH")]
        output_file: Option<PathBuf>,

        /// Base URL of an OpenAI-compatible API
        #[arg(long, value_name = "URL", env = "FIXLOOP_BASE_URL")]
        base_url: Option<String>,

        /// Interpreter command line, e.g. "python3 -u"
        #[arg(long, value_name = "COMMAND")]
        interpreter: Option<String>,

        /// Kill a script run after this many seconds (0 waits forever)
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Maximum repair cycles before giving up
        #[arg(long, default_value = "1")]
        max_cycles: u32,

        /// Never promote; decline every candidate without asking
        #[arg(long)]
        no_promote: bool,
    },

    /// List snapshots and bug-fix folders of a script's project
    History {
        /// The working script
        script: PathBuf,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Copy a snapshot back over the working script
    Restore {
        /// The working script
        script: PathBuf,

        /// Snapshot index to restore
        #[arg(long, value_name = "K")]
        snapshot: u32,

        /// Confirm overwriting the working script
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "fixloop=debug,info"
    } else {
        "fixloop=info,warn"
    };

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    let workspace = cli.workspace.canonicalize().unwrap_or(cli.workspace.clone());

    if !workspace.is_dir() {
        eprintln!(
            "{} Workspace directory does not exist: {}",
            "Error:".red().bold(),
            workspace.display()
        );
        std::process::exit(1);
    }

    let code = match execute(cli.command, &workspace).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn execute(command: Commands, workspace: &Path) -> Result<i32> {
    let config = FixloopConfig::load(workspace)?;

    match command {
        Commands::Run {
            script,
            model,
            output_file,
            base_url,
            interpreter,
            timeout,
            max_cycles,
            no_promote,
        } => {
            let mut config = config;

            // Command-line flags override settings.json
            if let Some(model) = model {
                config.llm.model = model;
            }
            if let Some(base_url) = base_url {
                config.llm.base_url = base_url;
            }
            if let Some(output_file) = output_file {
                config.transcript = output_file;
            }
            if let Some(ref command) = interpreter {
                config.execution = config.execution.with_interpreter_command(command);
            }
            if let Some(secs) = timeout {
                config.execution.timeout_secs = (secs > 0).then_some(secs);
            }
            config.validate()?;

            let deps = OrchestratorDeps::real(&config, no_promote)?;
            let mut orchestrator = Orchestrator::new(workspace, &script, &config, deps)?;

            println!("\n{} fixloop", "Starting".cyan().bold());
            println!("   {} {}", "Script:".cyan().bold(), orchestrator.project().script().display());
            println!("   {} {}", "Model:".cyan().bold(), config.llm.model);
            println!(
                "   {} {}",
                "Project:".cyan().bold(),
                orchestrator.project().root().display()
            );
            println!();

            let token = orchestrator.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, stopping the current stage");
                    token.cancel();
                }
            });

            let summary = orchestrator.run(max_cycles).await;

            println!("\n{}", "Summary".cyan().bold());
            println!("{}", "─".repeat(40));
            for report in &summary.cycles {
                let label = match report.counter {
                    Some(k) => format!("BugFix{k}"),
                    None => "run".to_string(),
                };
                let outcome = match report.outcome {
                    CycleOutcome::ScriptSucceeded | CycleOutcome::Promoted => {
                        report.outcome.to_string().green()
                    }
                    CycleOutcome::Declined | CycleOutcome::NoCandidate => {
                        report.outcome.to_string().yellow()
                    }
                    CycleOutcome::SandboxFailed => report.outcome.to_string().red(),
                };
                println!("   {:<10} {}", label, outcome);
            }
            if let Some(ref e) = summary.error {
                println!("   {} {}", "Stopped:".red().bold(), e);
            }

            Ok(summary.exit_code())
        }

        Commands::History { script, json } => {
            let project = Project::open(&config.projects_root(workspace), &script)?;
            let snapshots = BackupStore::new().list(&project)?;
            let bug_fixes = project.bug_fix_indices()?;

            if json {
                let value = serde_json::json!({
                    "project": project.name(),
                    "root": project.root(),
                    "snapshots": snapshots,
                    "bug_fixes": bug_fixes,
                    "next_counter": project.next_counter()?,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
                return Ok(0);
            }

            println!("\n{} {}", "Project:".cyan().bold(), project.name());
            println!("{}", "─".repeat(40));
            if snapshots.is_empty() {
                println!("   No snapshots yet");
            }
            for summary in &snapshots {
                match summary.manifest {
                    Some(ref manifest) => println!(
                        "   {:>4}  {}  {} file(s)  {}",
                        summary.counter,
                        manifest.created_at.format("%Y-%m-%d %H:%M:%S"),
                        manifest.environment.len(),
                        short_hash(&manifest.script_sha256)
                    ),
                    None => println!(
                        "   {:>4}  {}",
                        summary.counter,
                        "manifest missing or unreadable".red()
                    ),
                }
            }
            if !bug_fixes.is_empty() {
                let list: Vec<String> = bug_fixes.iter().map(u32::to_string).collect();
                println!("   {} {}", "Bug-fix folders:".cyan(), list.join(", "));
            }
            Ok(0)
        }

        Commands::Restore {
            script,
            snapshot,
            force,
        } => {
            let project = Project::open(&config.projects_root(workspace), &script)?;

            if !force {
                eprintln!(
                    "{} This will overwrite {} with snapshot {}. Use --force to confirm.",
                    "Warning:".yellow().bold(),
                    project.script().display(),
                    snapshot
                );
                return Ok(1);
            }

            let _lock = project.lock()?;
            let safety = project.next_counter()?;
            let report = BackupStore::new().restore(&project, snapshot, safety)?;

            println!(
                "{} Restored snapshot {} (previous version saved as snapshot {})",
                "OK".green().bold(),
                report.restored,
                report.safety_snapshot.counter
            );
            Ok(0)
        }
    }
}

/// First 12 characters of a hex digest; a malformed digest is shown whole.
fn short_hash(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

//! Operator-confirmed promotion of a sandboxed candidate.
//!
//! The only stage that waits for a human. A candidate reaches the question
//! only if its sandbox run succeeded; only an affirmative answer overwrites
//! the working script.

use crate::error::{FixloopError, Result};
use crate::sandbox::SandboxResult;
use anyhow::Context;
use async_trait::async_trait;
use colored::Colorize;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Source of the operator's answer.
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    /// Show `question` and return the raw answer.
    async fn ask(&self, question: &str) -> anyhow::Result<String>;
}

/// Reads one line from standard input.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

#[async_trait]
impl OperatorPrompt for StdinPrompt {
    async fn ask(&self, question: &str) -> anyhow::Result<String> {
        let question = question.to_string();
        tokio::task::spawn_blocking(move || {
            print!("{} ", question.yellow());
            std::io::stdout().flush().context("flushing stdout")?;
            let mut line = String::new();
            std::io::stdin()
                .read_line(&mut line)
                .context("reading operator answer")?;
            Ok(line)
        })
        .await
        .context("prompt task panicked")?
    }
}

/// Declines every promotion without asking.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclinePrompt;

#[async_trait]
impl OperatorPrompt for DeclinePrompt {
    async fn ask(&self, question: &str) -> anyhow::Result<String> {
        println!("{} {}", question.yellow(), "no (--no-promote)".dimmed());
        Ok("no".to_string())
    }
}

/// True for "yes" or "y", ignoring case and surrounding whitespace.
#[must_use]
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "yes" | "y")
}

/// What the gate did with a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionDecision {
    /// The working script now holds the candidate.
    Promoted,
    /// The operator said no; the working script is unchanged.
    Declined,
    /// The sandbox run failed; nobody was asked.
    NotEligible,
}

/// Asks the operator and overwrites the working script on approval.
pub struct PromotionGate<'a> {
    prompt: &'a dyn OperatorPrompt,
}

impl<'a> PromotionGate<'a> {
    #[must_use]
    pub fn new(prompt: &'a dyn OperatorPrompt) -> Self {
        Self { prompt }
    }

    /// Decide on the candidate at `sandbox.script` for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`FixloopError::Promotion`] if the prompt fails or the copy
    /// over `target` fails.
    pub async fn decide(&self, sandbox: &SandboxResult, target: &Path) -> Result<PromotionDecision> {
        if !sandbox.succeeded {
            info!("Sandbox run failed, skipping promotion");
            return Ok(PromotionDecision::NotEligible);
        }

        let question = format!(
            "The fix ran successfully. Replace {} with it? (yes/no)",
            target.display()
        );
        let answer = self
            .prompt
            .ask(&question)
            .await
            .map_err(|e| FixloopError::Promotion {
                path: target.to_path_buf(),
                message: format!("{e:#}"),
            })?;

        if !is_affirmative(&answer) {
            info!("Promotion declined");
            return Ok(PromotionDecision::Declined);
        }

        std::fs::copy(&sandbox.script, target).map_err(|e| FixloopError::Promotion {
            path: target.to_path_buf(),
            message: e.to_string(),
        })?;
        info!(
            "Promoted {} over {}",
            sandbox.script.display(),
            target.display()
        );
        Ok(PromotionDecision::Promoted)
    }
}

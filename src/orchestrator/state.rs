//! Cycle states and per-cycle results.

use crate::error::FixloopError;
use crate::exec::ExecutionResult;
use crate::promotion::PromotionDecision;
use std::fmt;
use std::path::PathBuf;

/// Where a repair cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleState {
    Idle,
    Running,
    Success,
    Failed,
    BackingUp,
    RequestingFix,
    ParsingFix,
    Sandboxing,
    AwaitingPromotionDecision,
    Promoted,
    Skipped,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::BackingUp => "backing up",
            Self::RequestingFix => "requesting fix",
            Self::ParsingFix => "parsing fix",
            Self::Sandboxing => "sandboxing",
            Self::AwaitingPromotionDecision => "awaiting promotion decision",
            Self::Promoted => "promoted",
            Self::Skipped => "skipped",
        };
        write!(f, "{name}")
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The working script exited 0; nothing else happened.
    ScriptSucceeded,
    /// The reply had no runnable candidate; the raw text was stored.
    NoCandidate,
    /// The candidate failed in the lab.
    SandboxFailed,
    /// The operator accepted the candidate.
    Promoted,
    /// The operator rejected the candidate.
    Declined,
}

impl CycleOutcome {
    /// Final state of a cycle that ended this way.
    #[must_use]
    pub fn final_state(self) -> CycleState {
        match self {
            Self::ScriptSucceeded => CycleState::Success,
            Self::Promoted => CycleState::Promoted,
            Self::NoCandidate | Self::SandboxFailed | Self::Declined => CycleState::Skipped,
        }
    }
}

impl From<PromotionDecision> for CycleOutcome {
    fn from(decision: PromotionDecision) -> Self {
        match decision {
            PromotionDecision::Promoted => Self::Promoted,
            PromotionDecision::Declined => Self::Declined,
            PromotionDecision::NotEligible => Self::SandboxFailed,
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ScriptSucceeded => "script ran successfully",
            Self::NoCandidate => "no runnable candidate in the response",
            Self::SandboxFailed => "candidate failed in the lab",
            Self::Promoted => "candidate promoted",
            Self::Declined => "candidate declined",
        };
        write!(f, "{text}")
    }
}

/// Everything one cycle produced.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Bug-fix index used, `None` if the script succeeded outright.
    pub counter: Option<u32>,
    pub outcome: CycleOutcome,
    pub execution: ExecutionResult,
    pub snapshot: Option<PathBuf>,
    pub candidate: Option<PathBuf>,
}

/// Result of a multi-cycle run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub cycles: Vec<CycleReport>,
    /// The error that ended the run early, if any.
    pub error: Option<FixloopError>,
}

impl RunSummary {
    /// True if the last cycle found the script working.
    #[must_use]
    pub fn script_succeeded(&self) -> bool {
        self.cycles
            .last()
            .is_some_and(|c| c.outcome == CycleOutcome::ScriptSucceeded)
    }

    /// Process exit code for this run.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.error.as_ref().map_or(0, FixloopError::exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_states() {
        assert_eq!(CycleOutcome::ScriptSucceeded.final_state(), CycleState::Success);
        assert_eq!(CycleOutcome::Promoted.final_state(), CycleState::Promoted);
        assert_eq!(CycleOutcome::Declined.final_state(), CycleState::Skipped);
        assert_eq!(CycleOutcome::NoCandidate.final_state(), CycleState::Skipped);
    }

    #[test]
    fn test_decision_mapping() {
        assert_eq!(
            CycleOutcome::from(PromotionDecision::NotEligible),
            CycleOutcome::SandboxFailed
        );
        assert_eq!(
            CycleOutcome::from(PromotionDecision::Promoted),
            CycleOutcome::Promoted
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(
            CycleState::AwaitingPromotionDecision.to_string(),
            "awaiting promotion decision"
        );
    }

    #[test]
    fn test_summary_exit_code() {
        let mut summary = RunSummary::default();
        assert_eq!(summary.exit_code(), 0);
        summary.error = Some(FixloopError::generation("offline"));
        assert_eq!(summary.exit_code(), 4);
    }
}

//! Convergence run reporting
//!
//! Every failure is attributed to (instance, component, step). A git-step
//! failure never flips an otherwise-converged instance's core outcome, but
//! any core failure makes the whole run exit non-zero.

use serde::{Deserialize, Serialize};

use crate::engine::plan::Component;

/// A failed step, attributed for actionable reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailure {
    pub component: Component,
    pub step: String,
    pub error: String,
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.component, self.step, self.error)
    }
}

/// Outcome of an instance's mandatory pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Converged { changes: usize },
    Failed { failure: StepFailure },
}

/// Outcome of an instance's git deployment subgraph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum GitOutcome {
    /// manage_git = false; nothing was inspected or created
    Disabled,
    Converged { changes: usize },
    Failed { failure: StepFailure },
    /// Core pipeline failed first, so the subgraph never started
    NotAttempted,
}

/// Per-instance result of one convergence run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceReport {
    pub name: String,
    pub core: Outcome,
    pub git: GitOutcome,
}

impl InstanceReport {
    /// Whether this instance counts against the process exit status
    pub fn core_failed(&self) -> bool {
        matches!(self.core, Outcome::Failed { .. })
    }

    pub fn git_failed(&self) -> bool {
        matches!(self.git, GitOutcome::Failed { .. })
    }

    /// Total mutations applied for this instance
    pub fn changes(&self) -> usize {
        let core = match &self.core {
            Outcome::Converged { changes } => *changes,
            Outcome::Failed { .. } => 0,
        };
        let git = match &self.git {
            GitOutcome::Converged { changes } => *changes,
            _ => 0,
        };
        core + git
    }
}

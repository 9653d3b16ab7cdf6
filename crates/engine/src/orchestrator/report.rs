//! Run reports.
//!
//! A report is the run's only output besides ledger updates: per-step
//! terminal status and timing, plus the first failure when there was one.
//! Nothing in a report ever contains a secret value.

use std::time::Duration;

use serde::Serialize;

use crate::error::BootstrapError;

/// Lifecycle of a pipeline step.
///
/// Steps move `Pending → Running → {Succeeded, Skipped, Failed}`. Only
/// the terminal states appear in reports; `Running` is observable through
/// tracing while the run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not started yet.
    Pending,
    /// Currently executing.
    Running,
    /// Executed and completed.
    Succeeded,
    /// Completed without doing work (artifact content unchanged).
    Skipped,
    /// Failed while executing, or never started because a predecessor failed.
    Failed,
}

impl StepStatus {
    /// Whether successors of a step in this state may start.
    pub fn unblocks_successors(self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Skipped)
    }

    /// Whether the step has reached a final state.
    pub fn is_terminal(self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Skipped => "skipped",
            StepStatus::Failed => "failed",
        };
        formatter.write_str(text)
    }
}

/// Terminal record for one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    /// Step identifier from the plan.
    pub id: String,
    /// Terminal status.
    pub status: StepStatus,
    /// Redacted context: skip reason, cascade source, or error text.
    pub detail: Option<String>,
    /// Bytes moved over the channel by this step.
    pub bytes_sent: u64,
    /// Wall-clock time spent executing; zero for steps that never started.
    pub duration: Duration,
}

/// Terminal status of a whole run.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every step succeeded or was skipped as unchanged.
    Succeeded,
    /// The run aborted; `step` produced the first failure.
    Failed {
        /// Identifier of the step that failed first.
        step: String,
        /// The first failure, by kind.
        error: BootstrapError,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded)
    }
}

/// Everything a caller learns from one run against one host.
#[derive(Debug)]
pub struct RunReport {
    /// Host identifier from the plan.
    pub host: String,
    /// Terminal step records in execution order.
    pub steps: Vec<StepReport>,
    /// Terminal run status.
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// The record for `id`, if the step exists.
    pub fn step(&self, id: &str) -> Option<&StepReport> {
        self.steps.iter().find(|step| step.id == id)
    }

    /// Total bytes moved over the channel during the run.
    pub fn bytes_sent(&self) -> u64 {
        self.steps.iter().map(|step| step.bytes_sent).sum()
    }
}

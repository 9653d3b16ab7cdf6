//! Error taxonomy for bootstrap runs.
//!
//! Every failure a run can surface maps onto one of these kinds. The
//! orchestrator never retries on its own; callers decide whether to
//! re-invoke the run, and [`BootstrapError::is_retryable`] tells them
//! which kinds are worth it. Captured remote output is redacted before it
//! is stored here.

use std::time::Duration;

use thiserror::Error;

/// Terminal error for a bootstrap run or one of its steps.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The host was unreachable or the channel dropped. Retryable by
    /// re-invoking the run.
    #[error("connection failed: {reason}")]
    Connection {
        /// What the channel reported.
        reason: String,
    },

    /// A remote command exited nonzero. Not retried automatically; the
    /// captured output travels with the error.
    #[error("command '{command}' exited with status {status}: {output}")]
    CommandFailed {
        /// Redacted description of the command.
        command: String,
        /// Remote exit status; `-1` when the process died without one.
        status: i32,
        /// Redacted captured output.
        output: String,
    },

    /// A file transfer failed to complete. Retryable from scratch; partial
    /// writes never reach the destination path.
    #[error("transfer to '{destination}' failed: {reason}")]
    Transfer {
        /// Remote destination path.
        destination: String,
        /// What went wrong.
        reason: String,
    },

    /// A template could not be rendered: missing binding or unreadable
    /// source. A configuration defect; never retried.
    #[error("template '{template}': {reason}")]
    Template {
        /// Template name as authored in the plan.
        template: String,
        /// What went wrong.
        reason: String,
    },

    /// A deferred value's producer went away without supplying a value.
    /// Fatal for this run.
    #[error("value '{name}' was never resolved by its producer")]
    ResourceNotReady {
        /// Binding name that stayed unresolved.
        name: String,
    },

    /// A readiness gate or resolution barrier deadline lapsed. Retryable
    /// with backoff.
    #[error("{operation} did not complete within {deadline:?}")]
    TimedOut {
        /// Which wait gave up.
        operation: String,
        /// The configured deadline.
        deadline: Duration,
    },

    /// The plan document is invalid (validation findings, unknown steps,
    /// dependency cycles). Never retried.
    #[error("invalid plan: {0}")]
    Plan(String),
}

impl BootstrapError {
    /// Whether re-invoking the whole run is a sensible reaction.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BootstrapError::Connection { .. } | BootstrapError::Transfer { .. } | BootstrapError::TimedOut { .. }
        )
    }
}

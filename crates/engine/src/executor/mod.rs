//! Remote execution abstraction.
//!
//! `RemoteExecutor` is the seam between the orchestrator and the actual
//! channel. The production implementation drives the system OpenSSH
//! client; [`DryRun`] records operations and succeeds, serving previews
//! and unit tests. Idempotency is always the caller's concern; the
//! executor reports outcomes, nothing more.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::command::CommandLine;
use crate::error::BootstrapError;

pub mod ssh;
pub use ssh::OpenSsh;

/// Captured result of a successfully executed remote command.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// An authenticated channel to one target host.
///
/// Both operations block until the remote side acknowledges completion.
/// A failed transfer is retried by calling [`RemoteExecutor::upload`]
/// again from scratch; there is no resume.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Execute `command` on the host. A nonzero exit status is an error
    /// (`CommandFailed`); an unreachable host is `Connection`.
    async fn run(&self, command: &CommandLine) -> Result<ExecOutput, BootstrapError>;

    /// Write `content` to `remote_path`, overwriting whatever is there.
    /// All-or-nothing: the destination path never holds a partial write.
    async fn upload(&self, content: &[u8], remote_path: &str) -> Result<(), BootstrapError>;
}

/// One operation observed by the [`DryRun`] executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DryRunEvent {
    /// A command that would have executed, in shell form.
    Command(String),
    /// An upload that would have happened.
    Upload {
        /// Remote destination path.
        remote_path: String,
        /// Rendered content size.
        bytes: usize,
    },
}

/// Executor that records operations instead of touching the network.
///
/// Every operation succeeds, which makes it useful for plan previews
/// (`rigger run --dry-run`) and for exercising orchestrator policy in
/// tests without a host.
#[derive(Default)]
pub struct DryRun {
    events: Mutex<Vec<DryRunEvent>>,
}

impl DryRun {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations observed so far, in order.
    pub fn events(&self) -> Vec<DryRunEvent> {
        self.events.lock().expect("dry-run mutex").clone()
    }
}

#[async_trait]
impl RemoteExecutor for DryRun {
    async fn run(&self, command: &CommandLine) -> Result<ExecOutput, BootstrapError> {
        self.events
            .lock()
            .expect("dry-run mutex")
            .push(DryRunEvent::Command(command.describe()));
        Ok(ExecOutput::default())
    }

    async fn upload(&self, content: &[u8], remote_path: &str) -> Result<(), BootstrapError> {
        self.events.lock().expect("dry-run mutex").push(DryRunEvent::Upload {
            remote_path: remote_path.to_string(),
            bytes: content.len(),
        });
        Ok(())
    }
}

//! OpenSSH-backed remote executor.
//!
//! Drives the system `ssh` client as a child process. Batch mode is
//! forced so an interactive prompt can never hang a run; authentication
//! comes from the configured identity file or the agent. The SSH protocol
//! itself stays opaque to the rest of the engine.

use std::process::Stdio;

use async_trait::async_trait;
use rigger_types::HostDefinition;
use rigger_util::redact::redact_sensitive;
use rigger_util::shell::quote_arg;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::command::CommandLine;
use crate::error::BootstrapError;
use crate::executor::{ExecOutput, RemoteExecutor};

/// The OpenSSH client reserves this exit status for its own failures
/// (unreachable host, authentication, dropped channel), distinguishing
/// them from the remote command's status.
const SSH_FAILURE_STATUS: i32 = 255;

/// Executor backed by the system `ssh` binary, bound to one target host.
pub struct OpenSsh {
    destination: String,
    port: u16,
    identity_file: Option<String>,
}

impl OpenSsh {
    /// Build an executor for the host a plan describes.
    pub fn new(host: &HostDefinition) -> Self {
        Self {
            destination: format!("{}@{}", host.user, host.address),
            port: host.port,
            identity_file: host.identity_file.clone(),
        }
    }

    fn client(&self) -> Command {
        let mut command = Command::new("ssh");
        command
            .arg("-p")
            .arg(self.port.to_string())
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new");
        if let Some(identity) = &self.identity_file {
            command.arg("-i").arg(identity);
        }
        command.arg(&self.destination);
        command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        command
    }

    async fn invoke(&self, shell_text: &str, stdin: Option<&[u8]>) -> Result<std::process::Output, BootstrapError> {
        let mut command = self.client();
        command.arg(shell_text);

        let mut child = command.spawn().map_err(|error| BootstrapError::Connection {
            reason: format!("failed to spawn ssh client: {error}"),
        })?;

        let mut stdin_handle = child.stdin.take();
        if let Some(bytes) = stdin
            && let Some(handle) = stdin_handle.as_mut()
        {
            handle.write_all(bytes).await.map_err(|error| BootstrapError::Connection {
                reason: format!("channel write failed: {error}"),
            })?;
        }
        // Close stdin so the remote side observes EOF.
        drop(stdin_handle);

        child.wait_with_output().await.map_err(|error| BootstrapError::Connection {
            reason: format!("channel closed unexpectedly: {error}"),
        })
    }
}

#[async_trait]
impl RemoteExecutor for OpenSsh {
    async fn run(&self, command: &CommandLine) -> Result<ExecOutput, BootstrapError> {
        debug!(destination = %self.destination, command = %command.describe(), "executing remote command");
        let output = self.invoke(&command.to_shell(), None).await?;

        let status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if status == SSH_FAILURE_STATUS {
            return Err(BootstrapError::Connection {
                reason: redact_sensitive(stderr.trim()),
            });
        }
        if !output.status.success() {
            return Err(BootstrapError::CommandFailed {
                command: command.describe(),
                status,
                output: redact_sensitive(format!("{stdout}{stderr}").trim()),
            });
        }
        Ok(ExecOutput { stdout, stderr })
    }

    async fn upload(&self, content: &[u8], remote_path: &str) -> Result<(), BootstrapError> {
        debug!(destination = %self.destination, remote_path, bytes = content.len(), "uploading artifact");
        let output = self.invoke(&upload_script(remote_path), Some(content)).await?;

        let status = output.status.code().unwrap_or(-1);
        if status == SSH_FAILURE_STATUS {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BootstrapError::Connection {
                reason: redact_sensitive(stderr.trim()),
            });
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BootstrapError::Transfer {
                destination: remote_path.to_string(),
                reason: redact_sensitive(stderr.trim()),
            });
        }
        Ok(())
    }
}

/// Stage the upload next to its destination and rename into place, so a
/// dropped channel never leaves a partial file at the destination path.
fn upload_script(remote_path: &str) -> String {
    let staged = quote_arg(&format!("{remote_path}.partial"));
    let destination = quote_arg(remote_path);
    format!("cat > {staged} && mv {staged} {destination}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_stages_then_renames() {
        assert_eq!(
            upload_script("~/resolv.conf"),
            "cat > ~/resolv.conf.partial && mv ~/resolv.conf.partial ~/resolv.conf"
        );
    }

    #[test]
    fn upload_script_quotes_unsafe_paths() {
        let script = upload_script("/etc/rstudio/launcher config");
        assert_eq!(
            script,
            "cat > '/etc/rstudio/launcher config.partial' && mv '/etc/rstudio/launcher config.partial' '/etc/rstudio/launcher config'"
        );
    }
}

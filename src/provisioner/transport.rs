//! Remote execution over SSH.
//!
//! [`RemoteTransport`] is the protected sink on the remote side: script
//! programs and file contents arrive as [`SecretString`]s and are written to
//! the child's stdin, never placed in argv or logged.

use anyhow::{Context, Result, bail};
use futures::future::{BoxFuture, FutureExt};
use secrecy::{ExposeSecret, SecretString};
use std::io::Write as _;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::connection::{Connection, Credential};
use crate::constants::{REMOTE_COPY_TIMEOUT, SSH_PROBE_TIMEOUT};
use crate::core::ProvisorError;
use crate::utils::shell::single_quote;

/// Result of running a program on the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs commands on and copies files to a remote host.
pub trait RemoteTransport: Send + Sync {
    /// Check that the host accepts connections.
    fn probe<'a>(&'a self, connection: &'a Connection) -> BoxFuture<'a, Result<()>>;

    /// Run a bash program fed on stdin.
    fn run_script<'a>(
        &'a self,
        connection: &'a Connection,
        program: &'a SecretString,
    ) -> BoxFuture<'a, Result<RemoteOutput>>;

    /// Write `content` to `remote_path` with owner-only permissions.
    fn copy_file<'a>(
        &'a self,
        connection: &'a Connection,
        content: &'a SecretString,
        remote_path: &'a str,
    ) -> BoxFuture<'a, Result<()>>;
}

/// [`RemoteTransport`] backed by the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshTransport {
    program: String,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// A prepared `ssh` invocation. Holds the temporary key file, if any, until
/// the command has finished.
struct SshInvocation {
    command: Command,
    _key_file: Option<tempfile::TempPath>,
}

impl SshTransport {
    pub fn new() -> Self {
        Self {
            program: "ssh".to_string(),
        }
    }

    /// Use a different `ssh` executable.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn prepare(&self, connection: &Connection, remote_command: &str) -> Result<SshInvocation> {
        let mut key_file = None;

        let mut command = match &connection.credential {
            Credential::Password(password) => {
                let sshpass = which::which("sshpass").map_err(|_| ProvisorError::ToolNotFound {
                    tool: "sshpass".to_string(),
                })?;
                let mut command = Command::new(sshpass);
                command.arg("-e").arg(&self.program);
                command.env("SSHPASS", password.expose_secret());
                command
            }
            Credential::KeyFile(path) => {
                let mut command = Command::new(&self.program);
                command.arg("-i").arg(path).args(["-o", "BatchMode=yes", "-o", "IdentitiesOnly=yes"]);
                command
            }
            Credential::Key(key) => {
                let path = write_temporary_key(key)?;
                let mut command = Command::new(&self.program);
                command.arg("-i").arg(&path).args(["-o", "BatchMode=yes", "-o", "IdentitiesOnly=yes"]);
                key_file = Some(path);
                command
            }
        };

        command
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .args(["-o", &format!("ConnectTimeout={}", SSH_PROBE_TIMEOUT.as_secs())])
            .arg("-p")
            .arg(connection.port.to_string())
            .arg(connection.destination())
            .arg(remote_command)
            .kill_on_drop(true);

        tracing::debug!(
            target: "ssh",
            "Prepared ssh to {}:{} running '{}'",
            connection.destination(),
            connection.port,
            remote_command
        );

        Ok(SshInvocation {
            command,
            _key_file: key_file,
        })
    }

    async fn run_with_stdin(
        &self,
        connection: &Connection,
        remote_command: &str,
        input: &SecretString,
    ) -> Result<RemoteOutput> {
        let mut invocation = self.prepare(connection, remote_command)?;
        invocation.command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::inherit());

        let mut child = invocation
            .command
            .spawn()
            .with_context(|| format!("Failed to start ssh to {}", connection.destination()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.expose_secret().as_bytes())
                .await
                .context("Failed to send program to ssh")?;
            stdin.shutdown().await.ok();
        }

        let output = child.wait_with_output().await.context("Failed to wait for ssh")?;
        Ok(RemoteOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

/// Write inline key material to a temporary file readable only by the owner.
fn write_temporary_key(key: &SecretString) -> Result<tempfile::TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("provisor-key-")
        .tempfile()
        .context("Failed to create temporary key file")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))
            .context("Failed to restrict temporary key file")?;
    }

    let material = key.expose_secret();
    file.write_all(material.as_bytes()).context("Failed to write temporary key file")?;
    if !material.ends_with('\n') {
        file.write_all(b"\n").context("Failed to write temporary key file")?;
    }
    file.flush()?;
    Ok(file.into_temp_path())
}

impl RemoteTransport for SshTransport {
    fn probe<'a>(&'a self, connection: &'a Connection) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut invocation = self.prepare(connection, "true")?;
            invocation.command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());

            let status = timeout(SSH_PROBE_TIMEOUT, invocation.command.status())
                .await
                .map_err(|_| {
                    anyhow::anyhow!("ssh probe timed out after {}s", SSH_PROBE_TIMEOUT.as_secs())
                })?
                .with_context(|| format!("Failed to start ssh to {}", connection.destination()))?;

            if !status.success() {
                bail!("ssh to {} exited with {status}", connection.destination());
            }
            Ok(())
        }
        .boxed()
    }

    fn run_script<'a>(
        &'a self,
        connection: &'a Connection,
        program: &'a SecretString,
    ) -> BoxFuture<'a, Result<RemoteOutput>> {
        self.run_with_stdin(connection, "bash -s", program).boxed()
    }

    fn copy_file<'a>(
        &'a self,
        connection: &'a Connection,
        content: &'a SecretString,
        remote_path: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let directory = remote_path.rsplit_once('/').map_or(".", |(dir, _)| dir);
            let directory = if directory.is_empty() { "/" } else { directory };
            let remote_command = format!(
                "mkdir -p {dir} && umask 077 && cat > {path} && chmod 600 {path}",
                dir = single_quote(directory),
                path = single_quote(remote_path)
            );

            let output = timeout(
                REMOTE_COPY_TIMEOUT,
                self.run_with_stdin(connection, &remote_command, content),
            )
            .await
            .map_err(|_| anyhow::anyhow!("Copy to {remote_path} timed out"))??;

            if !output.success() {
                bail!(
                    "Copy to {}:{remote_path} failed with exit code {:?}",
                    connection.host,
                    output.exit_code
                );
            }
            Ok(())
        }
        .boxed()
    }
}

/// Default wait used between the engine's reachability probes.
pub(crate) fn probe_backoff(attempts: usize) -> impl Iterator<Item = Duration> {
    tokio_retry::strategy::ExponentialBackoff::from_millis(2)
        .factor(250)
        .max_delay(crate::constants::MAX_PROBE_BACKOFF)
        .take(attempts.saturating_sub(1))
}

//! Playbook execution.
//!
//! Playbooks run from the local machine against the host. When a file named
//! `<playbook stem>.requirements.yaml` sits next to the playbook, its
//! collections are installed first.

use anyhow::{Context, Result, bail};
use futures::future::{BoxFuture, FutureExt};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::connection::{Connection, Credential};
use crate::constants::PLAYBOOK_REQUIREMENTS_SUFFIX;
use crate::core::ProvisorError;

/// Everything needed to run one playbook step.
#[derive(Clone)]
pub struct PlaybookInvocation {
    pub step: String,
    /// Validated absolute path.
    pub playbook: PathBuf,
    pub connection: Connection,
    pub variables: serde_json::Map<String, serde_json::Value>,
    pub tags: Vec<String>,
    pub limit: Option<String>,
    pub timeout: Duration,
}

impl fmt::Debug for PlaybookInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybookInvocation")
            .field("step", &self.step)
            .field("playbook", &self.playbook)
            .field("connection", &self.connection)
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("tags", &self.tags)
            .field("limit", &self.limit)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl PlaybookInvocation {
    /// Extra variables as JSON: connection facts first, then the step's own
    /// variables, which may override them.
    ///
    /// `key_file` is used for inline-key credentials. The result can contain
    /// a password and is therefore secret.
    pub fn extra_vars(&self, key_file: Option<&Path>) -> Result<SecretString> {
        let connection = &self.connection;
        let mut vars = serde_json::Map::new();
        vars.insert("ansible_host".into(), connection.host.clone().into());
        vars.insert("ansible_user".into(), connection.user.clone().into());
        vars.insert("ansible_port".into(), connection.port.into());

        match &connection.credential {
            Credential::KeyFile(path) => {
                vars.insert(
                    "ansible_ssh_private_key_file".into(),
                    path.to_string_lossy().into_owned().into(),
                );
            }
            Credential::Key(_) => {
                if let Some(path) = key_file {
                    vars.insert(
                        "ansible_ssh_private_key_file".into(),
                        path.to_string_lossy().into_owned().into(),
                    );
                }
            }
            Credential::Password(password) => {
                vars.insert("ansible_password".into(), password.expose_secret().clone().into());
            }
        }

        vars.insert("ansible_timeout".into(), self.timeout.as_secs().to_string().into());
        vars.insert("ansible_ssh_host_key_checking".into(), "false".into());
        vars.insert("ansible_ssh_retries".into(), "3".into());
        vars.insert("ansible_python_interpreter".into(), "auto_silent".into());

        for (key, value) in &self.variables {
            vars.insert(key.clone(), value.clone());
        }

        let json = serde_json::to_string(&serde_json::Value::Object(vars))
            .context("Failed to serialize playbook variables")?;
        Ok(SecretString::new(json))
    }
}

/// Companion requirements file of a playbook.
pub fn requirements_path(playbook: &Path) -> PathBuf {
    let stem = playbook.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    playbook.with_file_name(format!("{stem}{PLAYBOOK_REQUIREMENTS_SUFFIX}"))
}

/// Runs playbooks against hosts.
pub trait PlaybookRunner: Send + Sync {
    /// Install collections listed in a requirements file.
    fn install_requirements<'a>(&'a self, requirements: &'a Path) -> BoxFuture<'a, Result<()>>;

    fn run<'a>(&'a self, invocation: &'a PlaybookInvocation) -> BoxFuture<'a, Result<()>>;
}

/// [`PlaybookRunner`] using `ansible-galaxy` and `ansible-playbook`.
#[derive(Debug, Clone, Default)]
pub struct AnsibleRunner;

impl AnsibleRunner {
    pub fn new() -> Self {
        Self
    }
}

fn locate(tool: &str) -> Result<PathBuf> {
    which::which(tool).map_err(|_| {
        ProvisorError::ToolNotFound {
            tool: tool.to_string(),
        }
        .into()
    })
}

/// Write text to a temporary file readable only by the owner.
fn owner_only_temp_file(prefix: &str, suffix: &str, content: &str) -> Result<tempfile::TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile()
        .context("Failed to create temporary file")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))
            .context("Failed to restrict temporary file")?;
    }

    file.write_all(content.as_bytes()).context("Failed to write temporary file")?;
    file.flush()?;
    Ok(file.into_temp_path())
}

impl PlaybookRunner for AnsibleRunner {
    fn install_requirements<'a>(&'a self, requirements: &'a Path) -> BoxFuture<'a, Result<()>> {
        async move {
            let galaxy = locate("ansible-galaxy")?;
            let collections = match std::env::var_os("ANSIBLE_COLLECTIONS_PATH") {
                Some(path) => PathBuf::from(path),
                None => dirs::home_dir()
                    .context("Cannot determine home directory for ANSIBLE_COLLECTIONS_PATH")?
                    .join(".ansible/collections"),
            };

            tracing::info!(target: "provisioner", "Installing requirements from {}", requirements.display());
            let status = Command::new(galaxy)
                .args(["collection", "install", "-r"])
                .arg(requirements)
                .env("ANSIBLE_COLLECTIONS_PATH", &collections)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .status()
                .await
                .context("Failed to run ansible-galaxy")?;

            if !status.success() {
                bail!("ansible-galaxy exited with {status} for {}", requirements.display());
            }
            Ok(())
        }
        .boxed()
    }

    fn run<'a>(&'a self, invocation: &'a PlaybookInvocation) -> BoxFuture<'a, Result<()>> {
        async move {
            let program = locate("ansible-playbook")?;

            let key_file = match &invocation.connection.credential {
                Credential::Key(key) => {
                    let material = key.expose_secret();
                    let material = if material.ends_with('\n') {
                        material.clone()
                    } else {
                        format!("{material}\n")
                    };
                    Some(owner_only_temp_file("provisor-key-", "", &material)?)
                }
                _ => None,
            };
            let extra_vars = invocation.extra_vars(key_file.as_deref())?;
            let vars_file = owner_only_temp_file("provisor-vars-", ".json", extra_vars.expose_secret())?;

            let mut command = Command::new(program);
            command
                .arg("-i")
                .arg(format!("{},", invocation.connection.host))
                .arg("-e")
                .arg(format!("@{}", vars_file.display()));
            if !invocation.tags.is_empty() {
                command.arg("--tags").arg(invocation.tags.join(","));
            }
            if let Some(limit) = &invocation.limit {
                command.arg("--limit").arg(limit);
            }
            command.arg(&invocation.playbook).stdin(Stdio::null()).kill_on_drop(true);

            tracing::debug!(
                target: "provisioner",
                "Running playbook {} against {}",
                invocation.playbook.display(),
                invocation.connection.destination()
            );
            let status = command.status().await.context("Failed to run ansible-playbook")?;

            if !status.success() {
                bail!("ansible-playbook exited with {status}");
            }
            Ok(())
        }
        .boxed()
    }
}

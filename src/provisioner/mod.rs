//! Provisioner declarations and their ordered execution against a host.
//!
//! A host document lists provisioner steps in the order they must run:
//!
//! ```toml
//! [[provisioners]]
//! type = "script"
//! script = "scripts/install-docker.sh"
//! run_as = "root"
//! environment = { DOCKER_VERSION = "27.1" }
//!
//! [[provisioners]]
//! type = "playbook"
//! playbook = "playbooks/hardening.yml"
//! tags = ["ssh"]
//! ```
//!
//! The [`engine::ProvisionerEngine`] validates every referenced file before
//! any connection is opened, waits for the host to become reachable, and
//! then runs the steps one after the other. A failing step stops the chain;
//! the steps that already finished are reported but not rolled back.
//!
//! # Modules
//!
//! - [`connection`] - Connections, credentials and per-step overrides
//! - [`engine`] - Validation and sequential execution
//! - [`script`] - Remote bash program generation for script steps
//! - [`playbook`] - Playbook runner trait and the Ansible implementation
//! - [`transport`] - Remote transport trait and the SSH implementation

pub mod connection;
pub mod engine;
pub mod playbook;
pub mod script;
pub mod transport;

pub use connection::{Connection, ConnectionOverride, Credential};
pub use engine::ProvisionerEngine;
pub use playbook::{AnsibleRunner, PlaybookInvocation, PlaybookRunner};
pub use transport::{RemoteOutput, RemoteTransport, SshTransport};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::constants::{DEFAULT_PROVISIONER_TIMEOUT_SECS, DEFAULT_SSH_USER, DEFAULT_WORKING_DIRECTORY};

/// Lifecycle phase a provisioning run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

fn default_working_directory() -> String {
    DEFAULT_WORKING_DIRECTORY.to_string()
}

fn default_run_as() -> String {
    DEFAULT_SSH_USER.to_string()
}

const fn default_timeout() -> u64 {
    DEFAULT_PROVISIONER_TIMEOUT_SECS
}

fn default_run_on() -> Vec<Phase> {
    vec![Phase::Create]
}

const fn default_replayable() -> bool {
    true
}

/// A shell script uploaded to and executed on the host.
#[derive(Clone, Deserialize)]
pub struct ScriptProvisioner {
    #[serde(default)]
    pub name: Option<String>,
    /// Path relative to the project root.
    pub script: PathBuf,
    #[serde(default = "default_working_directory")]
    pub working_directory: String,
    #[serde(default = "default_run_as")]
    pub run_as: String,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_run_on")]
    pub run_on: Vec<Phase>,
    #[serde(default)]
    pub connection: Option<ConnectionOverride>,
}

impl fmt::Debug for ScriptProvisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptProvisioner")
            .field("name", &self.name)
            .field("script", &self.script)
            .field("working_directory", &self.working_directory)
            .field("run_as", &self.run_as)
            .field("environment", &self.environment.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("run_on", &self.run_on)
            .field("connection", &self.connection)
            .finish()
    }
}

/// A configuration-management playbook run from the local machine.
#[derive(Clone, Deserialize)]
pub struct PlaybookProvisioner {
    #[serde(default)]
    pub name: Option<String>,
    /// Path relative to the project root.
    pub playbook: PathBuf,
    #[serde(default)]
    pub variables: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub limit: Option<String>,
    /// Seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Run again on update.
    #[serde(default = "default_replayable")]
    pub replayable: bool,
    #[serde(default)]
    pub connection: Option<ConnectionOverride>,
}

impl fmt::Debug for PlaybookProvisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybookProvisioner")
            .field("name", &self.name)
            .field("playbook", &self.playbook)
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("tags", &self.tags)
            .field("limit", &self.limit)
            .field("timeout", &self.timeout)
            .field("replayable", &self.replayable)
            .field("connection", &self.connection)
            .finish()
    }
}

/// One declared provisioning step.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Provisioner {
    Script(ScriptProvisioner),
    #[serde(alias = "ansible")]
    Playbook(PlaybookProvisioner),
}

impl Provisioner {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Script(_) => StepKind::Script,
            Self::Playbook(_) => StepKind::Playbook,
        }
    }

    /// Referenced file, relative to the project root.
    pub fn path(&self) -> &Path {
        match self {
            Self::Script(script) => &script.script,
            Self::Playbook(playbook) => &playbook.playbook,
        }
    }

    /// Declared name, or the referenced file's stem.
    pub fn name(&self) -> String {
        let declared = match self {
            Self::Script(script) => script.name.as_deref(),
            Self::Playbook(playbook) => playbook.name.as_deref(),
        };
        declared.map(str::to_string).unwrap_or_else(|| {
            self.path()
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.kind().to_string())
        })
    }

    pub fn connection(&self) -> Option<&ConnectionOverride> {
        match self {
            Self::Script(script) => script.connection.as_ref(),
            Self::Playbook(playbook) => playbook.connection.as_ref(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(match self {
            Self::Script(script) => script.timeout,
            Self::Playbook(playbook) => playbook.timeout,
        })
    }

    /// Whether the step takes part in a run for `phase`.
    pub fn runs_on(&self, phase: Phase) -> bool {
        match self {
            Self::Script(script) => script.run_on.contains(&phase),
            Self::Playbook(playbook) => {
                phase == Phase::Create || (phase == Phase::Update && playbook.replayable)
            }
        }
    }
}

/// Step identifier: `<hostname>-provisioner-<index>-<name>`.
pub fn step_id(hostname: &str, index: usize, step: &Provisioner) -> String {
    format!("{hostname}-provisioner-{index}-{}", step.name())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Script,
    Playbook,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Script => "script",
            Self::Playbook => "playbook",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    /// Not part of the requested phase.
    Skipped,
}

/// Record of a step that finished without failing.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub id: String,
    pub kind: StepKind,
    pub status: StepStatus,
    /// Mechanism the remote script used to switch users.
    pub user_switch: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Errors raised while validating or executing a provisioner step.
#[derive(Error, Debug, Clone)]
pub enum ProvisionError {
    #[error("Provisioner {kind} path outside project directory: {}", .path.display())]
    PathOutsideRoot {
        kind: StepKind,
        path: PathBuf,
    },

    #[error("Provisioner {kind} not found: {}", .path.display())]
    FileNotFound {
        kind: StepKind,
        path: PathBuf,
    },

    #[error("Host {host} was not reachable after {attempts} attempt(s): {reason}")]
    HostUnreachable {
        host: String,
        attempts: usize,
        reason: String,
    },

    #[error("Invalid environment variable name '{key}' in provisioner {step}")]
    InvalidEnvironmentKey {
        step: String,
        key: String,
    },

    #[error(
        "Script provisioner {step} failed with exit code {}\n  script: {}\n  remote script: {remote_path}\n  user switch: {}",
        .exit_code.map_or_else(|| "unknown".to_string(), |code| code.to_string()),
        .script.display(),
        .user_switch.as_deref().unwrap_or("unknown")
    )]
    ScriptFailed {
        step: String,
        script: PathBuf,
        remote_path: String,
        user_switch: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Playbook provisioner {step} failed: {reason}")]
    PlaybookFailed {
        step: String,
        playbook: PathBuf,
        reason: String,
    },

    #[error("Provisioner {step} timed out after {seconds}s")]
    Timeout {
        step: String,
        seconds: u64,
    },

    #[error("Provisioner {step} could not run: {message}")]
    Execution {
        step: String,
        message: String,
    },
}

/// A provisioning chain stopped at step `index`.
#[derive(Error, Debug, Clone)]
#[error("Provisioner step {index} ({id}) failed")]
pub struct ChainFailure {
    pub index: usize,
    pub id: String,
    /// Steps that finished before the failure, in order.
    pub completed: Vec<StepOutcome>,
    pub source: ProvisionError,
}

//! Ordered provisioner execution.
//!
//! Each step moves through `pending -> connection-resolved -> validated ->
//! executing -> completed | failed`. Validation of every step happens up
//! front, so a missing file or a path outside the project root stops the run
//! before any connection is opened. Execution is strictly sequential: step
//! `i + 1` starts only after step `i` completed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::connection::Connection;
use super::playbook::{PlaybookInvocation, PlaybookRunner, requirements_path};
use super::script::{build_remote_script, parse_user_switch};
use super::transport::{RemoteTransport, probe_backoff};
use super::{
    ChainFailure, Phase, PlaybookProvisioner, ProvisionError, Provisioner, ScriptProvisioner,
    StepOutcome, StepStatus, step_id,
};
use crate::constants::DEFAULT_SSH_CONNECT_ATTEMPTS;
use crate::utils::path_validation::{contained_path, validate_project_path};

/// Resolve a step's file against the project root.
///
/// # Errors
///
/// [`ProvisionError::PathOutsideRoot`] when the path leaves the root, either
/// lexically or through a symlink; [`ProvisionError::FileNotFound`] when it
/// does not exist.
pub fn validate_step_path(project_root: &Path, step: &Provisioner) -> Result<PathBuf, ProvisionError> {
    let declared = step.path();
    let outside = || ProvisionError::PathOutsideRoot {
        kind: step.kind(),
        path: declared.to_path_buf(),
    };

    let candidate = contained_path(project_root, declared).ok_or_else(outside)?;
    if !candidate.is_file() {
        return Err(ProvisionError::FileNotFound {
            kind: step.kind(),
            path: declared.to_path_buf(),
        });
    }
    validate_project_path(&candidate, project_root).map_err(|_| outside())
}

/// Runs a host's provisioner chain.
pub struct ProvisionerEngine {
    project_root: PathBuf,
    hostname: String,
    connection: Connection,
    transport: Arc<dyn RemoteTransport>,
    playbooks: Arc<dyn PlaybookRunner>,
    connect_attempts: usize,
}

impl ProvisionerEngine {
    pub fn new(
        project_root: impl Into<PathBuf>,
        hostname: impl Into<String>,
        connection: Connection,
        transport: Arc<dyn RemoteTransport>,
        playbooks: Arc<dyn PlaybookRunner>,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            hostname: hostname.into(),
            connection,
            transport,
            playbooks,
            connect_attempts: DEFAULT_SSH_CONNECT_ATTEMPTS,
        }
    }

    /// Number of reachability probes before giving up.
    #[must_use]
    pub fn with_connect_attempts(mut self, attempts: usize) -> Self {
        self.connect_attempts = attempts.max(1);
        self
    }

    /// Validate every step's file, in order.
    ///
    /// # Errors
    ///
    /// Fails at the first invalid step, with no steps completed.
    pub fn validate(&self, steps: &[Provisioner]) -> Result<Vec<PathBuf>, ChainFailure> {
        steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                validate_step_path(&self.project_root, step).map_err(|source| ChainFailure {
                    index,
                    id: step_id(&self.hostname, index, step),
                    completed: Vec::new(),
                    source,
                })
            })
            .collect()
    }

    /// Run `steps` for `phase` in declared order.
    ///
    /// Steps that do not take part in `phase` are recorded as skipped. The
    /// first failure stops the chain and reports every step finished so far.
    pub async fn run(&self, steps: &[Provisioner], phase: Phase) -> Result<Vec<StepOutcome>, ChainFailure> {
        let paths = self.validate(steps)?;

        if let Some(first) = steps.iter().position(|step| step.runs_on(phase))
            && let Err(source) = self.wait_until_reachable().await
        {
            return Err(ChainFailure {
                index: first,
                id: step_id(&self.hostname, first, &steps[first]),
                completed: Vec::new(),
                source,
            });
        }

        let mut completed = Vec::with_capacity(steps.len());
        for (index, (step, path)) in steps.iter().zip(&paths).enumerate() {
            let id = step_id(&self.hostname, index, step);
            let started_at = Utc::now();

            if !step.runs_on(phase) {
                debug!(target: "provisioner", "Skipping {id}: not part of {phase}");
                completed.push(StepOutcome {
                    index,
                    id,
                    kind: step.kind(),
                    status: StepStatus::Skipped,
                    user_switch: None,
                    started_at,
                    finished_at: Utc::now(),
                });
                continue;
            }

            let connection = self.connection.with_override(step.connection());
            info!(target: "provisioner", "Running {id} ({}) as {}", step.kind(), connection.destination());

            let result = match step {
                Provisioner::Script(script) => self.run_script(&id, step, script, path, &connection).await,
                Provisioner::Playbook(playbook) => {
                    self.run_playbook(&id, step, playbook, path, connection).await.map(|()| None)
                }
            };

            match result {
                Ok(user_switch) => completed.push(StepOutcome {
                    index,
                    id,
                    kind: step.kind(),
                    status: StepStatus::Completed,
                    user_switch,
                    started_at,
                    finished_at: Utc::now(),
                }),
                Err(source) => {
                    warn!(target: "provisioner", "{id} failed; {} later step(s) not attempted", steps.len() - index - 1);
                    return Err(ChainFailure {
                        index,
                        id,
                        completed,
                        source,
                    });
                }
            }
        }

        Ok(completed)
    }

    async fn wait_until_reachable(&self) -> Result<(), ProvisionError> {
        let connection = &self.connection;
        debug!(target: "provisioner", "Waiting for {} to accept connections", connection.destination());

        tokio_retry::Retry::start(probe_backoff(self.connect_attempts), || async {
            self.transport.probe(connection).await.inspect_err(|e| {
                debug!(target: "provisioner", "Probe of {} failed: {e:#}", connection.host);
            })
        })
        .await
        .map_err(|e| ProvisionError::HostUnreachable {
            host: connection.host.clone(),
            attempts: self.connect_attempts,
            reason: format!("{e:#}"),
        })
    }

    async fn run_script(
        &self,
        id: &str,
        step: &Provisioner,
        script: &ScriptProvisioner,
        path: &Path,
        connection: &Connection,
    ) -> Result<Option<String>, ProvisionError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| ProvisionError::Execution {
            step: id.to_string(),
            message: format!("failed to read {}: {e}", script.script.display()),
        })?;
        let remote = build_remote_script(id, &step.name(), script, &content)?;

        let output = tokio::time::timeout(step.timeout(), self.transport.run_script(connection, &remote.body))
            .await
            .map_err(|_| ProvisionError::Timeout {
                step: id.to_string(),
                seconds: script.timeout,
            })?
            .map_err(|e| ProvisionError::Execution {
                step: id.to_string(),
                message: format!("{e:#}"),
            })?;

        let user_switch = parse_user_switch(&output.stdout);
        if !output.success() {
            return Err(ProvisionError::ScriptFailed {
                step: id.to_string(),
                script: script.script.clone(),
                remote_path: remote.remote_path,
                user_switch,
                exit_code: output.exit_code,
            });
        }
        if user_switch.as_deref() == Some("none") {
            warn!(target: "provisioner", "{id} ran as {} because no user switch was available", connection.user);
        }
        Ok(user_switch)
    }

    async fn run_playbook(
        &self,
        id: &str,
        step: &Provisioner,
        playbook: &PlaybookProvisioner,
        path: &Path,
        connection: Connection,
    ) -> Result<(), ProvisionError> {
        let failed = |e: anyhow::Error| ProvisionError::PlaybookFailed {
            step: id.to_string(),
            playbook: playbook.playbook.clone(),
            reason: format!("{e:#}"),
        };

        let requirements = requirements_path(path);
        if requirements.is_file() {
            self.playbooks.install_requirements(&requirements).await.map_err(failed)?;
        }

        let invocation = PlaybookInvocation {
            step: id.to_string(),
            playbook: path.to_path_buf(),
            connection,
            variables: playbook.variables.clone(),
            tags: playbook.tags.clone(),
            limit: playbook.limit.clone(),
            timeout: step.timeout(),
        };

        tokio::time::timeout(step.timeout(), self.playbooks.run(&invocation))
            .await
            .map_err(|_| ProvisionError::Timeout {
                step: id.to_string(),
                seconds: playbook.timeout,
            })?
            .map_err(failed)
    }
}

//! Test utilities for provisor
//!
//! Shared helpers for unit and integration tests. Available in unit tests and,
//! through the `test-utils` feature, to the integration test target.
//!
//! - [`init_test_logging`] installs a tracing subscriber once per process.
//! - [`RecordingTransport`] and [`RecordingPlaybookRunner`] stand in for SSH
//!   and Ansible and record what the provisioner engine sent them.

use futures::future::{BoxFuture, FutureExt};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::provisioner::script::USER_SWITCH_MARKER;
use crate::provisioner::{
    Connection, Credential, PlaybookInvocation, PlaybookRunner, RemoteOutput, RemoteTransport,
};

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG` if set; does nothing when
/// neither is available.
///
/// ```bash
/// RUST_LOG=provisioner=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}

/// A key-file connection to `host` for tests.
pub fn test_connection(host: &str) -> Connection {
    Connection {
        host: host.to_string(),
        user: "root".to_string(),
        port: 22,
        credential: Credential::KeyFile(PathBuf::from("/nonexistent/test_key")),
    }
}

/// A script run seen by [`RecordingTransport`].
#[derive(Debug, Clone)]
pub struct RecordedScript {
    pub destination: String,
    pub port: u16,
    /// Program text, opened for inspection.
    pub body: String,
}

/// A file copy seen by [`RecordingTransport`].
#[derive(Debug, Clone)]
pub struct RecordedCopy {
    pub destination: String,
    pub remote_path: String,
    pub content: String,
}

/// In-memory [`RemoteTransport`].
///
/// Every script succeeds and reports the `direct` user switch unless a
/// failure rule matches the program text.
#[derive(Default)]
pub struct RecordingTransport {
    probes: AtomicUsize,
    failing_probes: usize,
    unreachable: bool,
    failures: Vec<(String, i32)>,
    scripts: Mutex<Vec<RecordedScript>>,
    copies: Mutex<Vec<RecordedCopy>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit with `exit_code` when the program contains `needle`.
    #[must_use]
    pub fn fail_when_contains(mut self, needle: impl Into<String>, exit_code: i32) -> Self {
        self.failures.push((needle.into(), exit_code));
        self
    }

    /// Fail every probe.
    #[must_use]
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Fail the first `count` probes, then accept connections.
    #[must_use]
    pub fn reachable_after(mut self, count: usize) -> Self {
        self.failing_probes = count;
        self
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn scripts(&self) -> Vec<RecordedScript> {
        self.scripts.lock().unwrap().clone()
    }

    pub fn copies(&self) -> Vec<RecordedCopy> {
        self.copies.lock().unwrap().clone()
    }
}

impl RemoteTransport for RecordingTransport {
    fn probe<'a>(&'a self, connection: &'a Connection) -> BoxFuture<'a, anyhow::Result<()>> {
        async move {
            let attempt = self.probes.fetch_add(1, Ordering::SeqCst);
            if self.unreachable || attempt < self.failing_probes {
                anyhow::bail!("connection to {} refused", connection.host);
            }
            Ok(())
        }
        .boxed()
    }

    fn run_script<'a>(
        &'a self,
        connection: &'a Connection,
        program: &'a SecretString,
    ) -> BoxFuture<'a, anyhow::Result<RemoteOutput>> {
        async move {
            let body = program.expose_secret().clone();
            let exit_code = self
                .failures
                .iter()
                .find(|(needle, _)| body.contains(needle.as_str()))
                .map_or(0, |(_, code)| *code);

            self.scripts.lock().unwrap().push(RecordedScript {
                destination: connection.destination(),
                port: connection.port,
                body,
            });

            Ok(RemoteOutput {
                exit_code: Some(exit_code),
                stdout: format!("{USER_SWITCH_MARKER}direct\n"),
            })
        }
        .boxed()
    }

    fn copy_file<'a>(
        &'a self,
        connection: &'a Connection,
        content: &'a SecretString,
        remote_path: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        async move {
            self.copies.lock().unwrap().push(RecordedCopy {
                destination: connection.destination(),
                remote_path: remote_path.to_string(),
                content: content.expose_secret().clone(),
            });
            Ok(())
        }
        .boxed()
    }
}

/// A playbook run seen by [`RecordingPlaybookRunner`].
#[derive(Debug, Clone)]
pub struct RecordedPlaybook {
    pub step: String,
    pub playbook: PathBuf,
    pub host: String,
    pub tags: Vec<String>,
    /// Extra variables JSON, opened for inspection.
    pub extra_vars: String,
}

/// In-memory [`PlaybookRunner`].
#[derive(Default)]
pub struct RecordingPlaybookRunner {
    fail_step: Option<String>,
    requirements: Mutex<Vec<PathBuf>>,
    runs: Mutex<Vec<RecordedPlaybook>>,
}

impl RecordingPlaybookRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the run whose step identifier equals `step`.
    #[must_use]
    pub fn fail_step(mut self, step: impl Into<String>) -> Self {
        self.fail_step = Some(step.into());
        self
    }

    pub fn requirements(&self) -> Vec<PathBuf> {
        self.requirements.lock().unwrap().clone()
    }

    pub fn runs(&self) -> Vec<RecordedPlaybook> {
        self.runs.lock().unwrap().clone()
    }
}

impl PlaybookRunner for RecordingPlaybookRunner {
    fn install_requirements<'a>(&'a self, requirements: &'a Path) -> BoxFuture<'a, anyhow::Result<()>> {
        async move {
            self.requirements.lock().unwrap().push(requirements.to_path_buf());
            Ok(())
        }
        .boxed()
    }

    fn run<'a>(&'a self, invocation: &'a PlaybookInvocation) -> BoxFuture<'a, anyhow::Result<()>> {
        async move {
            let extra_vars = invocation.extra_vars(None)?.expose_secret().clone();
            self.runs.lock().unwrap().push(RecordedPlaybook {
                step: invocation.step.clone(),
                playbook: invocation.playbook.clone(),
                host: invocation.connection.host.clone(),
                tags: invocation.tags.clone(),
                extra_vars,
            });

            if self.fail_step.as_deref() == Some(invocation.step.as_str()) {
                anyhow::bail!("ansible-playbook exited with status 2");
            }
            Ok(())
        }
        .boxed()
    }
}

//! Host configuration documents.
//!
//! A host document is a TOML template in the hosts directory:
//!
//! ```toml
//! hostname = "web"
//! address = "{{ WEB_IP }}"
//!
//! [ssh]
//! user = "root"
//! private_key = '''{{ SECRET_WEB_SSH_KEY }}'''
//!
//! [stacks.monitoring]
//! subdomain_prefixes = { grafana = "dash" }
//!
//! [[provisioners]]
//! type = "script"
//! script = "scripts/bootstrap.sh"
//! ```
//!
//! Variables resolve in namespace `lxc#<hostname>`, so `parent.NAME` reaches
//! the shared `lxc` namespace. The `hostname` key is read from the raw text
//! before rendering and must therefore be a literal. A document that pulls in
//! a secret renders to [`HostDocument::Deferred`]; it is opened only on the
//! way to a protected sink.

use anyhow::{Context, Result};
use regex::Regex;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::constants::{
    DEFAULT_SSH_PORT, DEFAULT_SSH_PRIVATE_KEY_FILE, DEFAULT_SSH_USER, HOST_NAMESPACE_ROOT,
};
use crate::core::ProvisorError;
use crate::deferred::{Deferred, DeferredError, Value};
use crate::namespace::Namespace;
use crate::provisioner::connection::expand_home;
use crate::provisioner::{Connection, Credential, Provisioner};
use crate::templating::TemplateRenderer;

fn default_user() -> String {
    DEFAULT_SSH_USER.to_string()
}

const fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_private_key_file() -> PathBuf {
    PathBuf::from(DEFAULT_SSH_PRIVATE_KEY_FILE)
}

/// `[ssh]` table of a host document.
#[derive(Clone, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_private_key_file")]
    pub private_key_file: PathBuf,
    /// Inline key material; preferred over `private_key_file` when set.
    #[serde(default)]
    pub private_key: Option<SecretString>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            port: default_port(),
            private_key_file: default_private_key_file(),
            private_key: None,
        }
    }
}

impl fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConfig")
            .field("user", &self.user)
            .field("port", &self.port)
            .field("private_key_file", &self.private_key_file)
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Per-stack settings of a host.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StackConfig {
    #[serde(default)]
    pub subdomain_prefixes: BTreeMap<String, String>,
}

/// A rendered host document.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    pub hostname: String,
    /// Address to connect to; the hostname is used when absent.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub stacks: BTreeMap<String, StackConfig>,
    #[serde(default)]
    pub provisioners: Vec<Provisioner>,
}

impl HostConfig {
    /// Base connection that provisioner steps override.
    pub fn connection(&self) -> Connection {
        let credential = match &self.ssh.private_key {
            Some(key) => Credential::Key(key.clone()),
            None => Credential::KeyFile(expand_home(&self.ssh.private_key_file)),
        };
        Connection {
            host: self.address.clone().unwrap_or_else(|| self.hostname.clone()),
            user: self.ssh.user.clone(),
            port: self.ssh.port,
            credential,
        }
    }
}

/// Result of rendering a host document.
#[derive(Debug, Clone)]
pub enum HostDocument {
    Ready(HostConfig),
    /// The document references secrets or deferred values.
    Deferred(Deferred<HostConfig>),
}

impl HostDocument {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    /// Produce the configuration for a protected sink.
    pub(crate) async fn open(self) -> Result<HostConfig> {
        match self {
            Self::Ready(config) => Ok(config),
            Self::Deferred(deferred) => deferred.resolve().await.map_err(DeferredError::into_anyhow),
        }
    }
}

fn hostname_pattern() -> Result<&'static Regex, regex::Error> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"(?m)^\s*hostname\s*=\s*["']([^"']*)["']\s*(?:#.*)?$"#))
        .as_ref()
        .map_err(Clone::clone)
}

/// Read the literal `hostname` from an unrendered document.
pub fn read_hostname(raw: &str, path: &Path) -> Result<String> {
    let pattern = hostname_pattern()?;
    let invalid = |reason: &str| ProvisorError::InvalidHostConfig {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    let hostname = pattern
        .captures(raw)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_string())
        .ok_or_else(|| invalid("missing top-level 'hostname' key"))?;

    if hostname.is_empty() {
        return Err(invalid("'hostname' is empty").into());
    }
    if hostname.contains("{{") || hostname.contains("{%") {
        return Err(invalid("'hostname' must be a literal value").into());
    }
    Ok(hostname)
}

/// Namespace a host's variables resolve in.
pub fn host_namespace(hostname: &str) -> Result<Namespace> {
    Namespace::from_segments([HOST_NAMESPACE_ROOT, hostname])
        .with_context(|| format!("Invalid host name '{hostname}'"))
}

fn parse_host_config(rendered: &str, path: &Path, withhold: bool) -> Result<HostConfig> {
    toml::from_str(rendered).map_err(|e| {
        let reason = if withhold {
            "document does not match the host schema (details withheld: it contains secret values)"
                .to_string()
        } else {
            e.message().to_string()
        };
        ProvisorError::InvalidHostConfig {
            path: path.display().to_string(),
            reason,
        }
        .into()
    })
}

/// Render and parse one host document.
pub async fn load_host_config(renderer: &TemplateRenderer, path: &Path) -> Result<HostDocument> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read host document {}", path.display()))?;
    let hostname = read_hostname(&raw, path)?;
    let namespace = host_namespace(&hostname)?;

    debug!("Rendering host document {} in namespace '{namespace}'", path.display());
    let rendered = renderer
        .render_str(&path.display().to_string(), &raw, &namespace)
        .with_context(|| format!("Failed to render host document {}", path.display()))?;

    match rendered {
        Value::Plain(text) => parse_host_config(&text, path, false).map(HostDocument::Ready),
        Value::Deferred(deferred) => {
            let path = path.to_path_buf();
            let withhold = deferred.is_secret();
            Ok(HostDocument::Deferred(
                deferred.map(move |text| parse_host_config(&text, &path, withhold)),
            ))
        }
    }
}

fn is_host_document(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .map(|name| name.to_string_lossy())
            .is_some_and(|name| name.ends_with(".toml") || name.ends_with(".toml.tera"))
}

/// Render every host document in `dir`, sorted by file name.
///
/// Documents that fail to render or parse are skipped with a warning.
pub async fn load_all_host_configs(
    renderer: &TemplateRenderer,
    dir: &Path,
) -> Result<Vec<(PathBuf, HostDocument)>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read hosts directory {}", dir.display()))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_host_document(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        match load_host_config(renderer, &path).await {
            Ok(document) => documents.push((path, document)),
            Err(e) => warn!("Skipping host document {}: {e:#}", path.display()),
        }
    }
    Ok(documents)
}

/// Locate the document declaring `hostname` in `dir`.
///
/// `<dir>/<hostname>.toml` is tried first; otherwise every document's literal
/// `hostname` key is compared without rendering.
pub async fn find_host_document(dir: &Path, hostname: &str) -> Result<PathBuf> {
    for candidate in [format!("{hostname}.toml"), format!("{hostname}.toml.tera")] {
        let path = dir.join(candidate);
        if path.is_file() {
            return Ok(path);
        }
    }

    if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_host_document(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let Ok(raw) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            if read_hostname(&raw, &path).is_ok_and(|name| name == hostname) {
                return Ok(path);
            }
        }
    }

    Err(ProvisorError::HostNotFound {
        hostname: hostname.to_string(),
        directory: dir.display().to_string(),
    }
    .into())
}

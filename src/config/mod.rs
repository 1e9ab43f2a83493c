//! Project configuration (`provisor.toml`).
//!
//! The project file ties together the directories and files a provisor run
//! works with. Every field has a default, so an empty file is valid:
//!
//! ```toml
//! # Relative paths are resolved against the directory holding this file
//! project_root = "."
//! hosts_dir = "hosts"
//! stacks_dir = "stacks"
//! store = "config/store.toml"
//! remote_output_root = "/etc/provisor"
//! ssh_connect_attempts = 10
//!
//! # Optional; both must be set for domain helpers in stack templates
//! node = "pve1"
//! domain = "home.arpa"
//! ```
//!
//! # Lookup
//!
//! 1. `--config <path>`
//! 2. `PROVISOR_CONFIG`
//! 3. `provisor.toml` in the current directory or the nearest parent

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::constants::{DEFAULT_REMOTE_OUTPUT_ROOT, DEFAULT_SSH_CONNECT_ATTEMPTS, STACKS_FOLDER_NAME};
use crate::core::ProvisorError;

/// Name of the project file.
pub const PROJECT_FILE_NAME: &str = "provisor.toml";

/// Environment variable naming the project file.
pub const CONFIG_ENV_VAR: &str = "PROVISOR_CONFIG";

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_hosts_dir() -> PathBuf {
    PathBuf::from("hosts")
}

fn default_stacks_dir() -> PathBuf {
    PathBuf::from(STACKS_FOLDER_NAME)
}

fn default_store() -> PathBuf {
    PathBuf::from("config/store.toml")
}

fn default_remote_output_root() -> String {
    DEFAULT_REMOTE_OUTPUT_ROOT.to_string()
}

const fn default_connect_attempts() -> usize {
    DEFAULT_SSH_CONNECT_ATTEMPTS
}

/// Parsed `provisor.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
    #[serde(default = "default_hosts_dir")]
    pub hosts_dir: PathBuf,
    #[serde(default = "default_stacks_dir")]
    pub stacks_dir: PathBuf,
    /// Configuration store document (TOML or YAML).
    #[serde(default = "default_store")]
    pub store: PathBuf,
    #[serde(default = "default_remote_output_root")]
    pub remote_output_root: String,
    #[serde(default = "default_connect_attempts")]
    pub ssh_connect_attempts: usize,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            hosts_dir: default_hosts_dir(),
            stacks_dir: default_stacks_dir(),
            store: default_store(),
            remote_output_root: default_remote_output_root(),
            ssh_connect_attempts: default_connect_attempts(),
            node: None,
            domain: None,
        }
    }
}

/// Expand `~` and anchor relative paths at `base`.
fn anchor(base: &Path, path: &Path) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned());
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

impl ProjectConfig {
    /// Load a project file. Relative paths inside it are resolved against
    /// the file's directory.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read project config from {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse project config from {}", path.display()))?;

        let base = path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        config.project_root = anchor(&base, &config.project_root);
        config.hosts_dir = anchor(&config.project_root, &config.hosts_dir);
        config.stacks_dir = anchor(&config.project_root, &config.stacks_dir);
        config.store = anchor(&config.project_root, &config.store);
        config.validate()?;

        tracing::debug!("Loaded project config from {}", path.display());
        Ok(config)
    }

    /// Load using the lookup order `explicit`, `PROVISOR_CONFIG`, then the
    /// nearest `provisor.toml`.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = Self::locate(explicit)?;
        Self::load_from(&path).await
    }

    fn locate(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(anchor(Path::new(""), path));
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR)
            && !path.is_empty()
        {
            return Ok(anchor(Path::new(""), Path::new(&path)));
        }

        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        cwd.ancestors()
            .map(|dir| dir.join(PROJECT_FILE_NAME))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ProvisorError::ConfigNotFound.into())
    }

    fn validate(&self) -> Result<()> {
        if self.ssh_connect_attempts == 0 {
            return Err(ProvisorError::ConfigError {
                message: "ssh_connect_attempts must be at least 1".to_string(),
            }
            .into());
        }
        if !self.remote_output_root.starts_with('/') {
            return Err(ProvisorError::ConfigError {
                message: format!(
                    "remote_output_root must be an absolute path, got '{}'",
                    self.remote_output_root
                ),
            }
            .into());
        }
        if self.node.is_some() != self.domain.is_some() {
            tracing::warn!("Only one of 'node' and 'domain' is set; domain helpers are disabled");
        }
        Ok(())
    }
}

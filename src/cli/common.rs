//! Shared setup for CLI commands

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ProjectConfig;
use crate::hosts::{HostConfig, HostDocument, find_host_document, host_namespace, load_host_config};
use crate::namespace::Namespace;
use crate::store::{ConfigStore, FileStore};
use crate::templating::{TemplateData, TemplateRenderer};

/// Loaded project configuration and configuration store.
pub struct CommandContext {
    pub config: ProjectConfig,
    pub store: Arc<dyn ConfigStore>,
}

impl CommandContext {
    /// Load `provisor.toml` and the store it names.
    pub async fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = ProjectConfig::load(config_path).await?;

        let store = if config.store.is_file() {
            FileStore::load(&config.store).await?
        } else {
            tracing::warn!(
                "Configuration store {} does not exist; only templates without variables will render",
                config.store.display()
            );
            FileStore::default()
        };

        Ok(Self {
            config,
            store: Arc::new(store),
        })
    }

    pub fn renderer(&self) -> TemplateRenderer {
        TemplateRenderer::new(Arc::clone(&self.store))
    }

    /// Render the document declaring `hostname`.
    pub async fn host_document(&self, hostname: &str) -> Result<(PathBuf, HostDocument)> {
        let path = find_host_document(&self.config.hosts_dir, hostname).await?;
        let document = load_host_config(&self.renderer(), &path).await?;
        Ok((path, document))
    }

    /// Render data for stack templates of `host`, when the project declares
    /// a node and a domain.
    pub fn template_data(&self, host: &HostConfig, stack: &str) -> Option<TemplateData> {
        let (node, domain) = (self.config.node.clone()?, self.config.domain.clone()?);
        Some(TemplateData {
            hostname: host.hostname.clone(),
            stack_name: Some(stack.to_string()),
            node,
            domain,
            subdomain_prefixes: host
                .stacks
                .get(stack)
                .map(|stack| stack.subdomain_prefixes.clone())
                .unwrap_or_default(),
        })
    }
}

/// Parse a `--namespace` argument.
pub fn parse_namespace(value: &str) -> Result<Namespace> {
    Namespace::parse(value).with_context(|| format!("Invalid namespace '{value}'"))
}

/// Namespace of a stack deployed to a host: `lxc#<host>#<stack>`.
pub fn stack_namespace(hostname: &str, stack: &str) -> Result<Namespace> {
    host_namespace(hostname)?
        .child(stack)
        .with_context(|| format!("Invalid stack name '{stack}'"))
}

/// Express `path` relative to the current directory.
pub fn relative_to_cwd(path: &Path) -> Result<PathBuf> {
    if path.is_relative() {
        return Ok(path.to_path_buf());
    }

    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    if let Ok(relative) = path.strip_prefix(&cwd) {
        return Ok(relative.to_path_buf());
    }
    if let (Ok(canonical), Ok(cwd)) = (path.canonicalize(), cwd.canonicalize())
        && let Ok(relative) = canonical.strip_prefix(&cwd)
    {
        return Ok(relative.to_path_buf());
    }
    bail!(
        "{} is outside the current directory; run provisor from the project directory",
        path.display()
    )
}

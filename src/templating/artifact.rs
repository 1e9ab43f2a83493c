//! Rendered artifacts and the local artifact sink.

use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::discovery::{id_safe_name, remote_target_path};
use super::renderer::TemplateRenderer;
use crate::deferred::Value;
use crate::namespace::Namespace;

/// Output of rendering one template file.
///
/// Created once per render; nothing is cached between invocations.
#[derive(Clone)]
pub struct RenderedArtifact {
    /// Identifier derived from the template path (`stacks-web-dot-env-tera`).
    pub id_safe_name: String,
    pub template_path: PathBuf,
    /// Absolute path on the remote host.
    pub target_path: String,
    pub content: Value,
}

impl fmt::Debug for RenderedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderedArtifact")
            .field("id_safe_name", &self.id_safe_name)
            .field("template_path", &self.template_path)
            .field("target_path", &self.target_path)
            .field("content", &self.content)
            .finish()
    }
}

impl TemplateRenderer {
    /// Render a stack template into an artifact bound for `remote_root`.
    ///
    /// # Errors
    ///
    /// Fails when the template lies outside `stacks_root`, cannot be read, or
    /// does not resolve.
    pub async fn render_artifact(
        &self,
        template_path: &Path,
        stacks_root: &Path,
        remote_root: &str,
        namespace: &Namespace,
    ) -> Result<RenderedArtifact> {
        let target_path = remote_target_path(remote_root, stacks_root, template_path)?;
        let content = self.render_file(template_path, namespace).await?;

        tracing::debug!(
            "Rendered {} -> {target_path}{}",
            template_path.display(),
            if content.is_secret() { " (secret)" } else { "" }
        );

        Ok(RenderedArtifact {
            id_safe_name: id_safe_name(template_path),
            template_path: template_path.to_path_buf(),
            target_path,
            content,
        })
    }
}

/// Write rendered content to a local file readable only by its owner.
///
/// This is a protected sink: deferred content is opened here and nowhere
/// else on the local side.
///
/// # Errors
///
/// Fails when a deferred value fails to resolve or the file cannot be written.
pub async fn write_artifact(content: Value, path: &Path) -> Result<()> {
    let secret = content.into_secret().await.map_err(|e| e.into_anyhow())?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(path)
        .await
        .with_context(|| format!("Failed to open {} for writing", path.display()))?;
    file.write_all(secret.expose_secret().as_bytes())
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    file.flush().await?;

    // An existing file keeps its old mode on open
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

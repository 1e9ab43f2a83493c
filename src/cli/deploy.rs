//! Render a stack's templates and copy them to the host.
//!
//! Templates under `<stacks_dir>/<stack>/` render in namespace
//! `lxc#<host>#<stack>` and land below `<remote_output_root>/stacks/`.

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;

use super::common::{CommandContext, relative_to_cwd, stack_namespace};
use crate::provisioner::{RemoteTransport, SshTransport};
use crate::templating::{RenderedArtifact, discover_template_files};

/// Arguments for `provisor deploy`.
#[derive(Args, Debug)]
pub struct DeployCommand {
    /// Host name as declared by the document's `hostname` key
    pub host: String,

    /// Stack folder to deploy
    #[arg(short, long)]
    pub stack: String,

    /// Render and list targets without connecting to the host
    #[arg(long)]
    pub dry_run: bool,
}

impl DeployCommand {
    pub async fn execute(self, config_path: Option<&Path>) -> Result<()> {
        let context = CommandContext::load(config_path).await?;
        let (_, document) = context.host_document(&self.host).await?;
        let host = document.open().await?;

        let stacks_root = relative_to_cwd(&context.config.stacks_dir)?;
        let stack_dir = stacks_root.join(&self.stack);
        if !stack_dir.is_dir() {
            bail!("Stack folder {} does not exist", stack_dir.display());
        }

        let namespace = stack_namespace(&host.hostname, &self.stack)?;
        let mut renderer = context.renderer();
        if let Some(data) = context.template_data(&host, &self.stack) {
            renderer = renderer.with_data(data);
        }

        let templates = discover_template_files(&stack_dir, true)?;
        if templates.is_empty() {
            println!("{} no templates in {}", "⚠".yellow(), stack_dir.display());
            return Ok(());
        }

        let mut artifacts: Vec<RenderedArtifact> = Vec::with_capacity(templates.len());
        for template in &templates {
            artifacts.push(
                renderer
                    .render_artifact(template, &stacks_root, &context.config.remote_output_root, &namespace)
                    .await?,
            );
        }

        if self.dry_run {
            for artifact in &artifacts {
                println!(
                    "{} {} -> {}{}",
                    "•".cyan(),
                    artifact.template_path.display(),
                    artifact.target_path,
                    if artifact.content.is_secret() { " (secret)" } else { "" }
                );
            }
            return Ok(());
        }

        let transport = Arc::new(SshTransport::new());
        let connection = host.connection();
        for artifact in artifacts {
            let target = artifact.target_path.clone();
            let content = artifact.content.into_secret().await.map_err(|e| e.into_anyhow())?;
            transport
                .copy_file(&connection, &content, &target)
                .await
                .with_context(|| format!("Failed to deploy {}", artifact.template_path.display()))?;
            println!("{} {} -> {}:{target}", "✓".green(), artifact.template_path.display(), host.hostname);
        }
        Ok(())
    }
}

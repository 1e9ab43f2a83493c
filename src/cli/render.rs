//! Render a template against the configuration store.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::{Path, PathBuf};

use super::common::{CommandContext, parse_namespace};
use crate::core::ProvisorError;
use crate::deferred::Value;
use crate::templating::write_artifact;

/// Arguments for `provisor render`.
#[derive(Args, Debug)]
pub struct RenderCommand {
    /// Template file to render
    pub template: PathBuf,

    /// Namespace the template renders in (e.g. `lxc#web`)
    #[arg(short, long)]
    pub namespace: String,

    /// Write the result to this file (mode 0600) instead of stdout.
    ///
    /// Required when the template references secret values.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl RenderCommand {
    pub async fn execute(self, config_path: Option<&Path>) -> Result<()> {
        let context = CommandContext::load(config_path).await?;
        let namespace = parse_namespace(&self.namespace)?;

        let rendered = context.renderer().render_file(&self.template, &namespace).await?;

        if let Some(output) = &self.output {
            write_artifact(rendered, output).await?;
            eprintln!("{} Rendered {} -> {}", "✓".green(), self.template.display(), output.display());
            return Ok(());
        }

        match rendered {
            Value::Plain(text) => print!("{text}"),
            Value::Deferred(deferred) if !deferred.is_secret() => print!("{}", deferred.try_public().await?),
            Value::Deferred(_) => {
                return Err(ProvisorError::SecretOutputRefused {
                    path: self.template.display().to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

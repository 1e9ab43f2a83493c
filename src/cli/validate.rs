//! Check a host document without touching the host.
//!
//! Renders the document (resolving every variable, secrets included), then
//! checks that each provisioner's file exists inside the project root.
//! Nothing is printed from rendered values besides step identifiers.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::Path;

use super::common::CommandContext;
use crate::provisioner::engine::validate_step_path;
use crate::provisioner::{ChainFailure, step_id};

/// Arguments for `provisor validate`.
#[derive(Args, Debug)]
pub struct ValidateCommand {
    /// Host name as declared by the document's `hostname` key
    pub host: String,
}

impl ValidateCommand {
    pub async fn execute(self, config_path: Option<&Path>) -> Result<()> {
        let context = CommandContext::load(config_path).await?;
        let (path, document) = context.host_document(&self.host).await?;

        let deferred = document.is_deferred();
        let host = document.open().await?;
        println!(
            "{} {} rendered{}",
            "✓".green(),
            path.display(),
            if deferred { " (references secret values)" } else { "" }
        );

        for (index, step) in host.provisioners.iter().enumerate() {
            let id = step_id(&host.hostname, index, step);
            match validate_step_path(&context.config.project_root, step) {
                Ok(_) => println!("{} {id} ({})", "✓".green(), step.kind()),
                Err(source) => {
                    println!("{} {id} ({})", "✗".red(), step.kind());
                    return Err(ChainFailure {
                        index,
                        id,
                        completed: Vec::new(),
                        source,
                    }
                    .into());
                }
            }
        }

        if host.provisioners.is_empty() {
            println!("{} no provisioners declared", "⚠".yellow());
        }
        Ok(())
    }
}

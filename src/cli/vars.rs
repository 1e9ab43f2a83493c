//! List the variables a template references.
//!
//! Only the tokens written in the template are listed; references made by
//! stored values are followed at render time. Values are never printed.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::common::{CommandContext, parse_namespace};
use crate::namespace::resolve;
use crate::templating::parse_template;

/// Arguments for `provisor vars`.
#[derive(Args, Debug)]
pub struct VarsCommand {
    /// Template file to inspect
    pub template: PathBuf,

    /// Namespace the template renders in (e.g. `lxc#web`)
    #[arg(short, long)]
    pub namespace: String,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct VariableReport {
    token: String,
    namespace: String,
    name: String,
    secret: bool,
    found: bool,
}

impl VarsCommand {
    pub async fn execute(self, config_path: Option<&Path>) -> Result<()> {
        let context = CommandContext::load(config_path).await?;
        let namespace = parse_namespace(&self.namespace)?;

        let content = tokio::fs::read_to_string(&self.template)
            .await
            .with_context(|| format!("Failed to read template {}", self.template.display()))?;
        let parsed = parse_template(&self.template.display().to_string(), &content, false)?;

        let mut reports = Vec::with_capacity(parsed.variables.len());
        for token in &parsed.variables {
            let reference = resolve(token, &namespace)?;
            let found = context.store.fetch(&reference).is_ok();
            reports.push(VariableReport {
                token: token.clone(),
                namespace: reference.namespace.to_string(),
                name: reference.name,
                secret: reference.secret,
                found,
            });
        }

        if self.json {
            println!("{}", serde_json::to_string_pretty(&reports)?);
            return Ok(());
        }

        if reports.is_empty() {
            println!("{} references no variables", self.template.display());
            return Ok(());
        }

        for report in &reports {
            let status = if report.found { "✓".green() } else { "✗".red() };
            let kind = if report.secret { "secret".yellow() } else { "plain".normal() };
            println!("{status} {:<32} {:<24} {kind}", report.token, report.namespace);
        }

        let missing = reports.iter().filter(|r| !r.found).count();
        if missing > 0 {
            println!("\n{} {missing} variable(s) missing from the store", "⚠".yellow());
        }
        Ok(())
    }
}

//! Run a host's provisioners in order.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;

use super::common::CommandContext;
use crate::provisioner::{
    AnsibleRunner, Phase, ProvisionerEngine, SshTransport, StepOutcome, StepStatus,
};

/// Arguments for `provisor provision`.
#[derive(Args, Debug)]
pub struct ProvisionCommand {
    /// Host name as declared by the document's `hostname` key
    pub host: String,

    /// Lifecycle phase to run
    #[arg(long, value_enum, default_value_t = Phase::Create)]
    pub phase: Phase,

    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,
}

fn print_outcome(outcome: &StepOutcome) {
    match outcome.status {
        StepStatus::Completed => {
            let took = outcome.finished_at - outcome.started_at;
            let switch = outcome
                .user_switch
                .as_deref()
                .map(|mechanism| format!(", user switch: {mechanism}"))
                .unwrap_or_default();
            println!(
                "{} {} ({}, {:.1}s{switch})",
                "✓".green(),
                outcome.id,
                outcome.kind,
                took.num_milliseconds() as f64 / 1000.0
            );
        }
        StepStatus::Skipped => println!("{} {} ({}, skipped)", "-".dimmed(), outcome.id, outcome.kind),
    }
}

impl ProvisionCommand {
    pub async fn execute(self, config_path: Option<&Path>) -> Result<()> {
        let context = CommandContext::load(config_path).await?;
        let (_, document) = context.host_document(&self.host).await?;
        let host = document.open().await?;

        if host.provisioners.is_empty() {
            println!("{} {} declares no provisioners", "⚠".yellow(), host.hostname);
            return Ok(());
        }

        let engine = ProvisionerEngine::new(
            &context.config.project_root,
            &host.hostname,
            host.connection(),
            Arc::new(SshTransport::new()),
            Arc::new(AnsibleRunner::new()),
        )
        .with_connect_attempts(context.config.ssh_connect_attempts);

        tracing::info!(
            target: "provisioner",
            "Provisioning {} ({} step(s), phase {})",
            host.hostname,
            host.provisioners.len(),
            self.phase
        );

        match engine.run(&host.provisioners, self.phase).await {
            Ok(outcomes) => {
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&outcomes)?);
                } else {
                    outcomes.iter().for_each(print_outcome);
                    println!("{} {} provisioned", "✓".green().bold(), host.hostname);
                }
                Ok(())
            }
            Err(failure) => {
                if !self.json {
                    failure.completed.iter().for_each(print_outcome);
                    println!("{} {}", "✗".red(), failure.id);
                }
                Err(failure.into())
            }
        }
    }
}

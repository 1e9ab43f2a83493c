//! Command-line interface for provisor.
//!
//! # Available Commands
//!
//! ## Templates
//! - `vars` - List the variables a template references and whether the store has them
//! - `render` - Render a template; secret-bearing output only goes to a file
//!
//! ## Hosts
//! - `validate` - Render a host document and check its provisioner paths
//! - `provision` - Run a host's provisioners in declared order
//! - `deploy` - Render a stack's templates and copy them to the host
//!
//! # Examples
//!
//! ```bash
//! provisor vars stacks/monitoring/grafana.tera.ini --namespace 'lxc#web#monitoring'
//! provisor render templates/motd.tera --namespace 'lxc#web'
//! provisor render templates/db.tera.env --namespace 'lxc#db' --output ./db.env
//! provisor validate web
//! provisor provision web --phase update
//! provisor deploy web --stack monitoring
//! ```
//!
//! # Global Options
//!
//! - `--config <path>` (or `PROVISOR_CONFIG`): project file to use
//! - `--verbose` / `--quiet`: log at debug level / errors only. Without
//!   either, `RUST_LOG` applies and defaults to `info`.

mod common;
mod deploy;
mod provision;
mod render;
mod validate;
mod vars;

#[cfg(test)]
mod tests;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber, writing to stderr.
///
/// `filter` overrides `RUST_LOG` when given.
pub fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Secret-aware host templates and ordered remote provisioning.
#[derive(Parser)]
#[command(
    name = "provisor",
    about = "Render secret-aware host templates and run ordered provisioners",
    version,
    author
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to provisor.toml
    #[arg(short, long, global = true, env = "PROVISOR_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the variables a template references
    Vars(vars::VarsCommand),

    /// Render a template against the configuration store
    Render(render::RenderCommand),

    /// Render a host document and check its provisioners
    Validate(validate::ValidateCommand),

    /// Run a host's provisioners in order
    Provision(provision::ProvisionCommand),

    /// Render a stack's templates and copy them to the host
    Deploy(deploy::DeployCommand),
}

impl Cli {
    /// Log filter implied by `--verbose` / `--quiet`.
    #[must_use]
    pub fn log_filter(&self) -> Option<&'static str> {
        if self.verbose {
            Some("debug")
        } else if self.quiet {
            Some("error")
        } else {
            None
        }
    }

    pub async fn execute(self) -> Result<()> {
        let config = self.config.as_deref();
        match self.command {
            Commands::Vars(cmd) => cmd.execute(config).await,
            Commands::Render(cmd) => cmd.execute(config).await,
            Commands::Validate(cmd) => cmd.execute(config).await,
            Commands::Provision(cmd) => cmd.execute(config).await,
            Commands::Deploy(cmd) => cmd.execute(config).await,
        }
    }
}

//! Provisor CLI entry point
//!
//! This is the main executable for provisor. It handles command-line argument
//! parsing, logging setup, error display, and command execution.
//!
//! The CLI supports the following commands:
//! - `vars` - List the variables a template references
//! - `render` - Render a template against the configuration store
//! - `validate` - Render a host document and check its provisioners
//! - `provision` - Run a host's provisioners in order
//! - `deploy` - Render a stack's templates and copy them to the host

use anyhow::Result;
use clap::Parser;
use provisor_cli::cli;
use provisor_cli::core::error::user_friendly_error;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Set up colored output for Windows
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    cli::init_logging(cli.log_filter());

    // Execute the command
    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            // Convert to user-friendly error with context and suggestions
            let error_ctx = user_friendly_error(e);
            error_ctx.display();
            std::process::exit(1);
        }
    }
}

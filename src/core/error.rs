//! Error handling for provisor
//!
//! This module provides the crate-wide error type and user-friendly error
//! reporting for the CLI. The error system follows two principles:
//! 1. **Strongly-typed errors** per domain ([`NamespaceError`], [`StoreError`],
//!    [`TemplateError`], [`ProvisionError`]) for precise handling in code
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! # Error Categories
//!
//! - **Configuration**: missing variables, parent-of-root requests, invalid
//!   documents. Detected before any remote action and never retried.
//! - **Path safety**: scripts or playbooks outside the project root, or
//!   missing. Detected during validation, before any connection.
//! - **Remote execution**: non-zero script exits and playbook failures. Fatal
//!   to the provisioner chain; earlier steps are not rolled back.
//!
//! Secret values are never part of an error message. Errors carry variable
//! names, namespaces and file paths only.
//!
//! [`NamespaceError`]: crate::namespace::NamespaceError
//! [`StoreError`]: crate::store::StoreError
//! [`TemplateError`]: crate::templating::TemplateError
//! [`ProvisionError`]: crate::provisioner::ProvisionError

use colored::Colorize;
use std::fmt;
use thiserror::Error;

use crate::namespace::NamespaceError;
use crate::provisioner::{ChainFailure, ProvisionError};
use crate::store::StoreError;
use crate::templating::TemplateError;

/// The main error type for provisor application-level operations.
///
/// Domain modules define their own error enums; this type covers the
/// project configuration, host documents and CLI concerns, and is the type
/// wrapped by [`ErrorContext`] for display.
#[derive(Error, Debug, Clone)]
pub enum ProvisorError {
    /// Project configuration file (provisor.toml) not found
    #[error("Project file provisor.toml not found in current directory or any parent directory")]
    ConfigNotFound,

    /// Project configuration could not be parsed or is inconsistent
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the configuration error
        message: String,
    },

    /// Host document failed to parse after rendering
    #[error("Invalid host configuration in {path}: {reason}")]
    InvalidHostConfig {
        /// Path to the host document
        path: String,
        /// Parser message (never includes rendered values)
        reason: String,
    },

    /// Host document not found in the hosts directory
    #[error("No host document found for '{hostname}' in {directory}")]
    HostNotFound {
        /// Requested host name
        hostname: String,
        /// Directory that was searched
        directory: String,
    },

    /// A secret-bearing render was about to be printed to a non-protected sink
    #[error("Rendered output of {path} contains secret values and cannot be printed")]
    SecretOutputRefused {
        /// Template that was rendered
        path: String,
    },

    /// Required external tool not available on PATH
    #[error("Required tool '{tool}' was not found in PATH")]
    ToolNotFound {
        /// Tool name (e.g. `ssh`, `ansible-playbook`)
        tool: String,
    },

    /// Generic error with a message
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
    },
}

/// Error context wrapper that provides user-friendly error information
///
/// Pairs a [`ProvisorError`] with an optional suggestion and details, and
/// renders them with terminal colors.
///
/// ```rust,no_run
/// use provisor_cli::core::{ErrorContext, ProvisorError};
///
/// let context = ErrorContext::new(ProvisorError::ConfigNotFound)
///     .with_suggestion("Create a provisor.toml file in your project directory")
///     .with_details("provisor searches for provisor.toml in current and parent directories");
///
/// context.display();
/// ```
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: ProvisorError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with no suggestion or details.
    #[must_use]
    pub const fn new(error: ProvisorError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Display the error context to stderr with terminal colors
    ///
    /// - Error message: Red and bold
    /// - Details: Yellow
    /// - Suggestion: Green
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into a user-friendly [`ErrorContext`].
///
/// Domain errors are recognised by downcasting and receive tailored
/// suggestions. Anything else is reported with its full cause chain.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(provisor_error) = error.downcast_ref::<ProvisorError>() {
        return create_error_context(provisor_error.clone());
    }

    if let Some(failure) = error.downcast_ref::<ChainFailure>() {
        let details = if failure.completed.is_empty() {
            "No provisioner step completed before the failure".to_string()
        } else {
            let ids: Vec<&str> = failure.completed.iter().map(|o| o.id.as_str()).collect();
            format!("Steps finished before the failure: {}", ids.join(", "))
        };
        return ErrorContext::new(ProvisorError::Other {
            message: with_chain(&error),
        })
        .with_details(details)
        .with_suggestion(provision_suggestion(&failure.source));
    }

    if let Some(namespace_error) = error.downcast_ref::<NamespaceError>() {
        let suggestion = match namespace_error {
            NamespaceError::ParentOfRoot { .. } => {
                "Only nested namespaces (e.g. lxc#web) have a parent; use a local reference instead"
            }
            _ => {
                "Reference variables as NAME, parent.NAME or ns.<segment>.NAME (segments joined by '#')"
            }
        };
        return ErrorContext::new(ProvisorError::Other {
            message: with_chain(&error),
        })
        .with_suggestion(suggestion);
    }

    if let Some(template_error) = error.downcast_ref::<TemplateError>() {
        let ctx = ErrorContext::new(ProvisorError::Other {
            message: template_error.format_with_context(),
        });
        return match template_error {
            TemplateError::MissingVariables { namespace, .. } => ctx.with_suggestion(format!(
                "Add the missing keys to namespace '{namespace}' in the configuration store"
            )),
            TemplateError::CircularReference { .. } => ctx
                .with_suggestion("Break the cycle so that every variable eventually resolves to a literal value"),
            _ => ctx.with_suggestion(
                "Check template syntax: variables use {{ var }}, control flow uses {% %}",
            ),
        };
    }

    if let Some(store_error) = error.downcast_ref::<StoreError>() {
        return ErrorContext::new(ProvisorError::Other {
            message: with_chain(&error),
        })
        .with_suggestion(match store_error {
            StoreError::CommandSourceNotSecret { .. } => {
                "Command-sourced entries must use a SECRET_ prefixed key"
            }
            _ => "Check the configuration store file referenced by provisor.toml",
        });
    }

    if let Some(provision_error) = error.downcast_ref::<ProvisionError>() {
        return ErrorContext::new(ProvisorError::Other {
            message: with_chain(&error),
        })
        .with_suggestion(provision_suggestion(provision_error));
    }

    if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
        return ErrorContext::new(ProvisorError::ConfigError {
            message: toml_error.to_string(),
        })
        .with_suggestion("Check the TOML syntax. Verify quotes, brackets, and indentation");
    }

    ErrorContext::new(ProvisorError::Other {
        message: with_chain(&error),
    })
}

fn provision_suggestion(error: &ProvisionError) -> &'static str {
    match error {
        ProvisionError::PathOutsideRoot { .. } => {
            "Scripts and playbooks must live inside the project root"
        }
        ProvisionError::FileNotFound { .. } => {
            "Check the script/playbook path; it is resolved against the project root"
        }
        ProvisionError::HostUnreachable { .. } => {
            "Verify the host address, SSH key and that the machine has finished booting"
        }
        ProvisionError::ScriptFailed { .. } => {
            "Inspect the script output above; earlier steps were not rolled back"
        }
        _ => "Re-run with --verbose for more detail",
    }
}

/// Render an error with its cause chain.
fn with_chain(error: &anyhow::Error) -> String {
    let mut message = error.to_string();
    let chain: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();

    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    message
}

/// Attach suggestions to application-level errors.
fn create_error_context(error: ProvisorError) -> ErrorContext {
    match &error {
        ProvisorError::ConfigNotFound => ErrorContext::new(error)
            .with_suggestion("Create provisor.toml in the project root or pass --config <path>")
            .with_details("provisor looks for provisor.toml in the current directory and its parents"),
        ProvisorError::SecretOutputRefused { .. } => ErrorContext::new(error)
            .with_suggestion("Use --output <file> to write the rendered artifact with owner-only permissions"),
        ProvisorError::ToolNotFound { tool } => {
            let suggestion = format!("Install '{tool}' and make sure it is on your PATH");
            ErrorContext::new(error).with_suggestion(suggestion)
        }
        ProvisorError::HostNotFound { .. } => ErrorContext::new(error)
            .with_suggestion("Host documents are matched by their `hostname` key; check hosts_dir in provisor.toml"),
        _ => ErrorContext::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context_display() {
        let ctx = ErrorContext::new(ProvisorError::ConfigNotFound)
            .with_suggestion("create it")
            .with_details("searched upwards");
        let rendered = ctx.to_string();
        assert!(rendered.contains("provisor.toml not found"));
        assert!(rendered.contains("Details: searched upwards"));
        assert!(rendered.contains("Suggestion: create it"));
    }

    #[test]
    fn test_user_friendly_missing_variables() {
        let error = TemplateError::MissingVariables {
            namespace: "svc".to_string(),
            missing: vec!["DB_HOST".to_string()],
            found: vec!["DB_PORT".to_string()],
            suggestions: vec![],
        };
        let ctx = user_friendly_error(anyhow::Error::new(error));
        assert!(ctx.error.to_string().contains("DB_HOST"));
        assert!(ctx.suggestion.unwrap().contains("'svc'"));
    }

    #[test]
    fn test_user_friendly_parent_of_root() {
        let error = NamespaceError::ParentOfRoot {
            namespace: "svc".to_string(),
        };
        let ctx = user_friendly_error(anyhow::Error::new(error));
        assert!(ctx.error.to_string().contains("svc"));
        assert!(ctx.suggestion.is_some());
    }

    #[test]
    fn test_generic_error_includes_chain() {
        let error = anyhow::anyhow!("root cause").context("outer");
        let ctx = user_friendly_error(error);
        let message = ctx.error.to_string();
        assert!(message.contains("outer"));
        assert!(message.contains("root cause"));
    }
}

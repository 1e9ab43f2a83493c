//! Template error handling
//!
//! Structured errors for extraction, variable resolution and rendering, with
//! a detailed [`TemplateError::format_with_context`] rendering for the CLI.
//!
//! When a failing template or value involves secret variables, Tera's message
//! (which may quote template text) is replaced by [`WITHHELD_MESSAGE`].

use std::collections::BTreeMap;

use crate::namespace::NamespaceError;
use crate::store::StoreError;

/// Replacement message used when details could reveal secret material.
pub const WITHHELD_MESSAGE: &str = "details withheld because secret values are involved";

/// Template errors with enough context to diagnose without a re-run
#[derive(Debug)]
pub enum TemplateError {
    /// Template text could not be parsed.
    SyntaxError {
        /// What was being parsed (a template path or `variable 'NAME'`)
        template: String,
        message: String,
        line: Option<usize>,
    },

    /// Template parsed but failed while rendering.
    RenderError {
        template: String,
        message: String,
    },

    /// One or more referenced keys are absent from the store.
    MissingVariables {
        namespace: String,
        missing: Vec<String>,
        found: Vec<String>,
        suggestions: Vec<String>,
    },

    /// Variables reference each other in a loop.
    CircularReference {
        variables: Vec<String>,
    },

    /// A token could not be addressed (malformed, or parent of a root namespace).
    Reference(NamespaceError),

    /// The store failed for a reason other than a missing key.
    Store {
        token: String,
        source: StoreError,
    },
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateError::SyntaxError {
                template,
                message,
                ..
            } => write!(f, "Template syntax error in {template}: {message}"),
            TemplateError::RenderError {
                template,
                message,
            } => write!(f, "Failed to render {template}: {message}"),
            TemplateError::MissingVariables {
                namespace,
                missing,
                ..
            } => write!(
                f,
                "Missing variables in namespace '{namespace}': {}",
                missing.join(", ")
            ),
            TemplateError::CircularReference {
                variables,
            } => write!(f, "Circular variable reference among: {}", variables.join(", ")),
            TemplateError::Reference(source) => write!(f, "{source}"),
            TemplateError::Store {
                token,
                source,
            } => write!(f, "Failed to fetch '{token}': {source}"),
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TemplateError::Reference(source) => Some(source),
            TemplateError::Store {
                source,
                ..
            } => Some(source),
            _ => None,
        }
    }
}

impl From<NamespaceError> for TemplateError {
    fn from(error: NamespaceError) -> Self {
        TemplateError::Reference(error)
    }
}

impl TemplateError {
    /// Generate user-friendly error message with context and suggestions
    pub fn format_with_context(&self) -> String {
        match self {
            TemplateError::MissingVariables {
                namespace,
                missing,
                found,
                suggestions,
            } => format_missing_variables(namespace, missing, found, suggestions),
            TemplateError::CircularReference {
                variables,
            } => format_circular_reference(variables),
            TemplateError::SyntaxError {
                template,
                message,
                line,
            } => format_syntax_error(template, message, *line),
            _ => self.to_string(),
        }
    }
}

fn format_missing_variables(
    namespace: &str,
    missing: &[String],
    found: &[String],
    suggestions: &[String],
) -> String {
    let mut msg = String::new();

    msg.push_str("ERROR: Missing Template Variables\n\n");
    msg.push_str(&format!("Namespace: {namespace}\n"));
    msg.push_str("Missing:\n");
    for name in missing {
        msg.push_str(&format!("  - {name}\n"));
    }

    if !suggestions.is_empty() {
        msg.push_str("\nDid you mean one of these?\n");
        for suggestion in suggestions {
            msg.push_str(&format!("  - {suggestion}\n"));
        }
    }

    if !found.is_empty() {
        // Group by addressing prefix so long lists stay readable
        let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for name in found {
            let prefix = name.rsplit_once('.').map_or("", |(prefix, _)| prefix);
            grouped.entry(prefix).or_default().push(name.as_str());
        }

        msg.push_str("\nFound:\n");
        for (prefix, names) in &grouped {
            if names.len() <= 5 {
                for name in names {
                    msg.push_str(&format!("  {name}\n"));
                }
            } else if prefix.is_empty() {
                msg.push_str(&format!("  ({} local variables)\n", names.len()));
            } else {
                msg.push_str(&format!("  {prefix}.*  ({} variables)\n", names.len()));
            }
        }
    }

    msg
}

fn format_circular_reference(variables: &[String]) -> String {
    let mut msg = String::new();

    msg.push_str("ERROR: Circular Variable Reference\n\n");
    msg.push_str("These variables keep referencing each other and never resolve:\n");
    for name in variables {
        msg.push_str(&format!("  {name}\n"));
    }
    msg.push_str("\nSUGGESTION: Make sure every reference chain ends in a literal value.\n");

    msg
}

fn format_syntax_error(template: &str, message: &str, line: Option<usize>) -> String {
    let mut msg = String::new();

    msg.push_str("ERROR: Template Syntax Error\n\n");
    msg.push_str(&format!("Template: {template}\n"));
    if let Some(line) = line {
        msg.push_str(&format!("Line: {line}\n"));
    }
    msg.push_str(&format!("Error: {message}\n"));

    msg.push_str("\nSUGGESTION: Check template syntax for unclosed tags or invalid expressions.\n");
    msg.push_str("Common issues:\n");
    msg.push_str("  - Unclosed {{ }} or {% %} delimiters\n");
    msg.push_str("  - Variable names with unsupported characters (use parent.NAME / ns.seg.NAME)\n");
    msg.push_str("  - Missing quotes around string values\n");

    msg
}

/// Flatten a Tera error chain into one message, dropping Tera's internal
/// one-off template name.
pub(crate) fn format_tera_error(error: &tera::Error) -> String {
    use std::error::Error;

    let mut all_messages = vec![error.to_string()];
    let mut current: Option<&dyn Error> = error.source();
    while let Some(err) = current {
        all_messages.push(err.to_string());
        current = err.source();
    }

    let messages: Vec<String> = all_messages
        .into_iter()
        .map(|msg| {
            msg.replace("while rendering '__tera_one_off'", "")
                .replace("Failed to render '__tera_one_off'", "Template rendering failed")
                .replace("Failed to parse '__tera_one_off'", "Template syntax error")
                .replace("'__tera_one_off'", "template")
                .trim()
                .to_string()
        })
        .filter(|msg| {
            !msg.is_empty() && msg != "Template rendering failed" && msg != "Template syntax error"
        })
        .collect();

    if messages.is_empty() {
        "Template syntax error".to_string()
    } else {
        messages.join("\n  -> ")
    }
}

/// Tera reports parse positions as `line:column`.
pub(crate) fn line_from_tera_error(error: &tera::Error) -> Option<usize> {
    let message = format!("{error:?}");
    let re = regex::Regex::new(r"(\d+):(\d+)").ok()?;
    re.captures(&message)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_variables_lists_everything() {
        let error = TemplateError::MissingVariables {
            namespace: "svc".to_string(),
            missing: vec!["DB_HOST".to_string(), "DB_USER".to_string()],
            found: vec!["DB_PORT".to_string()],
            suggestions: vec!["DB_HOSTNAME".to_string()],
        };
        let formatted = error.format_with_context();
        assert!(formatted.contains("Namespace: svc"));
        assert!(formatted.contains("  - DB_HOST"));
        assert!(formatted.contains("  - DB_USER"));
        assert!(formatted.contains("  DB_PORT"));
        assert!(formatted.contains("DB_HOSTNAME"));
        assert_eq!(error.to_string(), "Missing variables in namespace 'svc': DB_HOST, DB_USER");
    }

    #[test]
    fn test_circular_reference_display() {
        let error = TemplateError::CircularReference {
            variables: vec!["A".to_string(), "B".to_string()],
        };
        assert!(error.to_string().contains("A, B"));
        assert!(error.format_with_context().contains("Circular Variable Reference"));
    }

    #[test]
    fn test_reference_error_keeps_source() {
        use std::error::Error;
        let error = TemplateError::from(NamespaceError::ParentOfRoot {
            namespace: "a".to_string(),
        });
        assert!(error.source().is_some());
        assert!(error.to_string().contains("root namespace"));
    }

    #[test]
    fn test_format_tera_error_strips_internal_names() {
        let err = tera::Tera::one_off("{{ unclosed", &tera::Context::new(), false).unwrap_err();
        let formatted = format_tera_error(&err);
        assert!(!formatted.contains("__tera_one_off"));
    }
}

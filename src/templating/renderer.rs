//! Template rendering with Tera.
//!
//! [`TemplateRenderer`] drives the full pipeline for one template: extract the
//! variable tokens, resolve them recursively against the configuration store,
//! and substitute the result in a single Tera pass.
//!
//! The render context mirrors token spelling. Local tokens are top-level keys;
//! `parent.NAME` lives under a `parent` object and `ns.lxc.db.NAME` under
//! `ns.lxc.db`. Optional [`TemplateData`] is exposed as `data` and powers the
//! domain functions.

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tera::{Context as TeraContext, Tera};

use super::error::{TemplateError, WITHHELD_MESSAGE, format_tera_error};
use super::extractor::parse_template;
use super::functions::{create_domain_for_app_function, create_domain_for_container_function};
use super::resolver::{ResolvedVariables, VariableMap, resolve_variables};
use crate::constants::TEMPLATE_DATA_ROOT;
use crate::deferred::Value;
use crate::namespace::{Namespace, VariableRef};
use crate::store::ConfigStore;

/// Host and stack facts available to templates as `data`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateData {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_name: Option<String>,
    pub node: String,
    pub domain: String,
    /// Per-app subdomain overrides used by `domain_for_app`.
    #[serde(default)]
    pub subdomain_prefixes: BTreeMap<String, String>,
}

/// Place `value` under `parents` then `leaf`; false when a parent segment is
/// already a string.
fn insert_at_path(
    node: &mut serde_json::Map<String, serde_json::Value>,
    parents: &[&str],
    leaf: &str,
    value: &str,
) -> bool {
    match parents.split_first() {
        None => {
            node.insert(leaf.to_string(), serde_json::Value::String(value.to_string()));
            true
        }
        Some((segment, rest)) => match node
            .entry((*segment).to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()))
        {
            serde_json::Value::Object(child) => insert_at_path(child, rest, leaf, value),
            _ => false,
        },
    }
}

/// Build a nested JSON context from resolved tokens.
pub(crate) fn nested_context(variables: &VariableMap) -> serde_json::Map<String, serde_json::Value> {
    let mut root = serde_json::Map::new();

    for (token, value) in variables {
        let Ok(reference) = VariableRef::parse(token) else {
            continue;
        };
        let path = reference.context_path();
        let Some((leaf, parents)) = path.split_last() else {
            continue;
        };

        if !insert_at_path(&mut root, parents, leaf, value) {
            tracing::warn!("Variable '{token}' conflicts with another variable of the same path");
        }
    }

    root
}

fn build_context(
    variables: &VariableMap,
    data: Option<&TemplateData>,
) -> Result<TeraContext, tera::Error> {
    let mut root = nested_context(variables);
    if let Some(data) = data {
        root.insert(TEMPLATE_DATA_ROOT.to_string(), serde_json::to_value(data)?);
    }
    TeraContext::from_value(serde_json::Value::Object(root))
}

/// Render `text` against resolved variables in one Tera pass.
///
/// With `withhold` set, Tera's message is not included in the error.
pub(crate) fn render_text(
    label: &str,
    text: &str,
    variables: &VariableMap,
    data: Option<&TemplateData>,
    withhold: bool,
) -> Result<String, TemplateError> {
    let to_error = |e: tera::Error| TemplateError::RenderError {
        template: label.to_string(),
        message: if withhold {
            WITHHELD_MESSAGE.to_string()
        } else {
            format_tera_error(&e)
        },
    };

    let context = build_context(variables, data).map_err(to_error)?;

    // Fresh instance per render; functions capture the render data
    let mut tera = Tera::default();
    if let Some(data) = data {
        tera.register_function(
            "domain_for_container",
            create_domain_for_container_function(data.clone()),
        );
        tera.register_function("domain_for_app", create_domain_for_app_function(data.clone()));
    }

    tera.render_str(text, &context).map_err(to_error)
}

/// Renders templates against a configuration store.
///
/// ```rust,no_run
/// use provisor_cli::namespace::Namespace;
/// use provisor_cli::store::MemoryStore;
/// use provisor_cli::templating::TemplateRenderer;
/// use std::sync::Arc;
///
/// let svc = Namespace::parse("svc").unwrap();
/// let store = MemoryStore::new().with_value(&svc, "name", "alice");
/// let renderer = TemplateRenderer::new(Arc::new(store));
///
/// let rendered = renderer.render_str("greeting", "Hello {{ name }}", &svc).unwrap();
/// assert_eq!(rendered.as_plain(), Some("Hello alice"));
/// ```
#[derive(Clone)]
pub struct TemplateRenderer {
    store: Arc<dyn ConfigStore>,
    data: Option<TemplateData>,
}

impl TemplateRenderer {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            data: None,
        }
    }

    /// Expose host and stack facts to templates.
    #[must_use]
    pub fn with_data(mut self, data: TemplateData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Render template text in `namespace`.
    ///
    /// A template with no variables that does not read render data is returned
    /// unchanged. When any contributing value is deferred the result is a
    /// deferred value with the same secrecy, and is only produced once a
    /// protected sink opens it.
    pub fn render_str(
        &self,
        label: &str,
        content: &str,
        namespace: &Namespace,
    ) -> Result<Value, TemplateError> {
        let parsed = parse_template(label, content, false)?;

        if parsed.variables.is_empty() && !parsed.uses_render_data {
            tracing::debug!("Template {label} has no variables, returning content as-is");
            return Ok(Value::Plain(content.to_string()));
        }

        tracing::debug!(
            "Rendering {label} in namespace '{namespace}' with {} variable(s)",
            parsed.variables.len()
        );

        match resolve_variables(
            Arc::clone(&self.store),
            namespace,
            &parsed.variables,
            self.data.as_ref(),
        )? {
            ResolvedVariables::Ready(resolution) => {
                render_text(label, content, &resolution.variables, self.data.as_ref(), false)
                    .map(Value::Plain)
            }
            ResolvedVariables::Deferred(deferred) => {
                let label = label.to_string();
                let content = content.to_string();
                let data = self.data.clone();
                let rendered = deferred.map(move |resolution| {
                    render_text(&label, &content, &resolution.variables, data.as_ref(), true)
                        .map_err(anyhow::Error::from)
                });
                Ok(Value::Deferred(rendered))
            }
        }
    }

    /// Read and render a template file.
    pub async fn render_file(&self, path: &Path, namespace: &Namespace) -> Result<Value> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read template {}", path.display()))?;

        self.render_str(&path.display().to_string(), &content, namespace)
            .with_context(|| format!("Failed to render template {}", path.display()))
    }
}

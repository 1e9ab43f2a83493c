//! Tera functions backed by render data.
//!
//! Stack templates can compute the public domain of the container they are
//! deployed to, and of the apps in their stack:
//!
//! ```text
//! {{ domain_for_container() }}       -> web.provisor.pve1.example.com
//! {{ domain_for_app(app="grafana") }} -> grafana.web.provisor.pve1.example.com
//! ```
//!
//! `domain_for_app` uses the stack's subdomain prefix for the app when one is
//! configured, otherwise the app name itself.

use std::collections::HashMap;

use super::renderer::TemplateData;
use crate::constants::DOMAIN_SERVICE_LABEL;

/// Base domain of the host described by `data`.
pub fn container_domain(data: &TemplateData) -> String {
    format!("{}.{}.{}.{}", data.hostname, DOMAIN_SERVICE_LABEL, data.node, data.domain)
}

/// Domain of an app deployed on the host described by `data`.
pub fn app_domain(data: &TemplateData, app: &str) -> String {
    let prefix = data.subdomain_prefixes.get(app).map_or(app, String::as_str);
    format!("{prefix}.{}", container_domain(data))
}

/// Create the `domain_for_container()` function.
pub fn create_domain_for_container_function(data: TemplateData) -> impl tera::Function + 'static {
    move |_args: &HashMap<String, tera::Value>| -> tera::Result<tera::Value> {
        Ok(tera::Value::String(container_domain(&data)))
    }
}

/// Create the `domain_for_app(app=...)` function.
///
/// # Errors
///
/// The returned function fails the render when `app` is missing or not a string.
pub fn create_domain_for_app_function(data: TemplateData) -> impl tera::Function + 'static {
    move |args: &HashMap<String, tera::Value>| -> tera::Result<tera::Value> {
        let app = args
            .get("app")
            .and_then(tera::Value::as_str)
            .ok_or_else(|| tera::Error::msg("domain_for_app requires a string `app` argument"))?;
        Ok(tera::Value::String(app_domain(&data, app)))
    }
}

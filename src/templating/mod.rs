//! Secret-aware Tera templating for host and stack configuration.
//!
//! This module turns a template plus a configuration store into rendered
//! output. Rendering happens in three stages:
//!
//! 1. **Extraction** ([`extract_variables`]) walks the Tera syntax tree and
//!    collects every variable token the template references.
//! 2. **Resolution** ([`resolve_variables`]) looks each token up in its
//!    namespace, discovers references embedded in the fetched values, and
//!    repeats until no new tokens appear. Nested values are then expanded so
//!    that every value is free of references to other variables.
//! 3. **Rendering** ([`TemplateRenderer`]) substitutes the resolved map in a
//!    single Tera pass.
//!
//! # Variable Addressing
//!
//! ```text
//! {{ DB_HOST }}              # current namespace
//! {{ parent.DOMAIN }}        # parent namespace: lxc#web -> lxc
//! {{ ns.lxc.db.DB_PORT }}    # explicit namespace lxc#db
//! ```
//!
//! # Secrets
//!
//! Variables whose name starts with `SECRET_` (any case) are fetched as
//! deferred handles. Whenever a deferred value contributes to a render, the
//! rendered output is itself a [`Value::Deferred`](crate::deferred::Value)
//! that only a protected sink can open ([`write_artifact`], the remote
//! transport, the playbook runner). Errors raised while a secret is involved
//! never quote template or value text.
//!
//! # Render Data
//!
//! Host facts are available under `data` along with two helper functions:
//!
//! ```text
//! {{ data.hostname }}
//! {{ domain_for_container() }}
//! {{ domain_for_app(app="grafana") }}
//! ```
//!
//! # Examples
//!
//! ## Recursive Values
//!
//! With `GREETING = "Hi {{ NAME }}"` and `NAME = "Bob"` in the store, the
//! template `{{ GREETING }}!` renders to `Hi Bob!`.
//!
//! ## Conditional Content
//!
//! ```text
//! {% if ENABLE_TLS == "true" %}
//! listen 443 ssl;
//! ssl_certificate {{ TLS_CERT_PATH }};
//! {% else %}
//! listen 80;
//! {% endif %}
//! ```
//!
//! Both branches are scanned, so `TLS_CERT_PATH` must exist in the store
//! even when TLS is disabled.

pub mod artifact;
pub mod discovery;
pub mod error;
pub mod extractor;
pub mod functions;
pub mod renderer;
pub mod resolver;

pub use artifact::{RenderedArtifact, write_artifact};
pub use discovery::{
    discover_template_files, id_safe_name, is_template_file, remote_target_path,
    remove_template_extensions,
};
pub use error::TemplateError;
pub use extractor::{ParsedTemplate, extract_variables, parse_template};
pub use renderer::{TemplateData, TemplateRenderer};
pub use resolver::{Resolution, ResolvedVariables, VariableMap, resolve_variables};

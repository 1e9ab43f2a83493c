//! Provisor - secret-aware host templates and ordered remote provisioning
//!
//! Provisor renders host and service configuration templates whose variables
//! come from a namespaced configuration store, resolves those variables
//! transitively (a value may reference further variables), and then runs an
//! ordered chain of provisioning steps (shell scripts or Ansible playbooks)
//! against the host the rendered configuration describes.
//!
//! # Architecture Overview
//!
//! ```text
//! template ──► extractor ──► namespace resolver + config store
//!                                  │
//!                                  ▼
//!                        recursive variable resolver ──► renderer ──► artifact
//!                                                                      │
//! host document ──► (same render path) ──► HostConfig ──► provisioner engine
//! ```
//!
//! Values that are secret, or that come from an asynchronous source, travel as
//! [`deferred::Value::Deferred`] handles. They are only ever opened by a
//! protected sink (remote transport, playbook runner, local artifact writer).
//!
//! # Core Modules
//!
//! - [`namespace`] - Namespaces and variable reference addressing
//! - [`store`] - Configuration store trait and its memory/file backends
//! - [`deferred`] - Deferred values, combination and the secret boundary
//! - [`templating`] - Variable extraction, recursive resolution, rendering
//! - [`hosts`] - Host configuration documents rendered through templating
//! - [`provisioner`] - Step declarations, connections and the execution engine
//!
//! ## Supporting Modules
//! - [`cli`] - Command-line interface
//! - [`config`] - Project configuration (`provisor.toml`)
//! - [`core`] - Error types and user-facing error reporting
//! - [`utils`] - Path containment and shell escaping helpers
//!
//! # Template Syntax
//!
//! Templates use Tera syntax. Variables are addressed as:
//!
//! ```text
//! {{ DB_HOST }}              # current namespace
//! {{ parent.DOMAIN }}        # parent namespace (lxc#web -> lxc)
//! {{ ns.lxc.db.DB_PORT }}    # explicit namespace lxc#db
//! {{ SECRET_DB_PASSWORD }}   # secret: stays deferred until a protected sink
//! ```

// Core functionality modules
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;

// Resolution and rendering
pub mod deferred;
pub mod namespace;
pub mod store;
pub mod templating;

// Hosts and provisioning
pub mod hosts;
pub mod provisioner;

// Supporting modules
pub mod utils;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

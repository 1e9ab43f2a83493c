//! Configuration store: namespaced key/value sources for template variables
//!
//! The resolver talks to a store through the [`ConfigStore`] trait:
//!
//! - [`ConfigStore::require_plain`] returns the value of a non-secret key, or
//!   fails if the key is absent.
//! - [`ConfigStore::require_secret`] returns a secret [`Deferred`] handle,
//!   or fails if the key is absent. The value itself is only produced when a
//!   protected sink opens the handle.
//!
//! Two backends are provided: [`MemoryStore`] for embedding and tests, and
//! [`FileStore`] which reads a TOML or YAML document.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use thiserror::Error;

use crate::deferred::{Deferred, Value};
use crate::namespace::{Namespace, ResolvedRef};

/// Errors returned by configuration store lookups.
///
/// Messages name keys, namespaces and sources. They never contain values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Key '{key}' not found in namespace '{namespace}'")]
    MissingKey {
        namespace: String,
        key: String,
    },

    /// A non-secret key whose value is only available asynchronously.
    #[error("Key '{key}' in namespace '{namespace}' is not a plain value")]
    NotPlain {
        namespace: String,
        key: String,
    },

    #[error("Environment variable '{variable}' for key '{key}' in namespace '{namespace}' is not set")]
    EnvNotSet {
        namespace: String,
        key: String,
        variable: String,
    },

    #[error(
        "Key '{key}' in namespace '{namespace}' is sourced from a command but is not a secret key"
    )]
    CommandSourceNotSecret {
        namespace: String,
        key: String,
    },
}

/// A namespaced key/value source.
pub trait ConfigStore: Send + Sync {
    /// Fetch a non-secret value.
    fn require_plain(&self, namespace: &Namespace, key: &str) -> Result<String, StoreError>;

    /// Fetch a secret value as a deferred handle.
    fn require_secret(
        &self,
        namespace: &Namespace,
        key: &str,
    ) -> Result<Deferred<String>, StoreError>;

    /// Keys known in a namespace. Used for "did you mean" suggestions only.
    fn keys(&self, _namespace: &Namespace) -> Vec<String> {
        Vec::new()
    }

    /// Fetch a resolved reference with the accessor matching its secrecy.
    fn fetch(&self, reference: &ResolvedRef) -> Result<Value, StoreError> {
        if reference.secret {
            self.require_secret(&reference.namespace, &reference.name).map(Value::Deferred)
        } else {
            self.require_plain(&reference.namespace, &reference.name).map(Value::Plain)
        }
    }
}

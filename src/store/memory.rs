use std::collections::{BTreeMap, HashMap};

use super::{ConfigStore, StoreError};
use crate::deferred::Deferred;
use crate::namespace::Namespace;

#[derive(Clone)]
enum Entry {
    Text(String),
    Deferred(Deferred<String>),
}

/// In-process configuration store.
///
/// ```rust
/// use provisor_cli::namespace::Namespace;
/// use provisor_cli::store::{ConfigStore, MemoryStore};
///
/// let svc = Namespace::parse("svc").unwrap();
/// let store = MemoryStore::new().with_value(&svc, "name", "alice");
/// assert_eq!(store.require_plain(&svc, "name").unwrap(), "alice");
/// ```
#[derive(Clone, Default)]
pub struct MemoryStore {
    namespaces: HashMap<Namespace, BTreeMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, namespace: &Namespace, key: impl Into<String>, value: impl Into<String>) {
        self.namespaces
            .entry(namespace.clone())
            .or_default()
            .insert(key.into(), Entry::Text(value.into()));
    }

    /// Register a value that is only available asynchronously.
    pub fn insert_deferred(
        &mut self,
        namespace: &Namespace,
        key: impl Into<String>,
        value: Deferred<String>,
    ) {
        self.namespaces
            .entry(namespace.clone())
            .or_default()
            .insert(key.into(), Entry::Deferred(value));
    }

    #[must_use]
    pub fn with_value(
        mut self,
        namespace: &Namespace,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.insert(namespace, key, value);
        self
    }

    #[must_use]
    pub fn with_deferred(
        mut self,
        namespace: &Namespace,
        key: impl Into<String>,
        value: Deferred<String>,
    ) -> Self {
        self.insert_deferred(namespace, key, value);
        self
    }

    fn entry(&self, namespace: &Namespace, key: &str) -> Result<&Entry, StoreError> {
        self.namespaces.get(namespace).and_then(|entries| entries.get(key)).ok_or_else(|| {
            StoreError::MissingKey {
                namespace: namespace.to_string(),
                key: key.to_string(),
            }
        })
    }
}

impl ConfigStore for MemoryStore {
    fn require_plain(&self, namespace: &Namespace, key: &str) -> Result<String, StoreError> {
        match self.entry(namespace, key)? {
            Entry::Text(text) => Ok(text.clone()),
            Entry::Deferred(_) => Err(StoreError::NotPlain {
                namespace: namespace.to_string(),
                key: key.to_string(),
            }),
        }
    }

    fn require_secret(
        &self,
        namespace: &Namespace,
        key: &str,
    ) -> Result<Deferred<String>, StoreError> {
        Ok(match self.entry(namespace, key)? {
            Entry::Text(text) => Deferred::secret(text.clone()),
            Entry::Deferred(deferred) => deferred.clone().mark_secret(),
        })
    }

    fn keys(&self, namespace: &Namespace) -> Vec<String> {
        self.namespaces
            .get(namespace)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

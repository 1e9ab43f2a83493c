//! File-backed configuration store.
//!
//! The document's top-level tables are namespaces. Each entry is a literal,
//! an environment reference, or (for secret keys only) a command whose
//! standard output is the value:
//!
//! ```toml
//! ["svc"]
//! name = "alice"
//! port = 8080
//! SECRET_API_KEY = { env = "SVC_API_KEY" }
//!
//! ["lxc#db"]
//! SECRET_PASSWORD = { command = ["pass", "show", "lxc/db"] }
//! ```
//!
//! YAML documents (`.yaml` / `.yml`) use the same shape.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use tokio::fs;
use tokio::process::Command;

use super::{ConfigStore, StoreError};
use crate::deferred::Deferred;
use crate::namespace::Namespace;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Env {
        env: String,
    },
    Command {
        command: Vec<String>,
    },
}

#[derive(Clone)]
enum Source {
    Literal(String),
    Env(String),
    Command(Vec<String>),
}

impl From<RawEntry> for Source {
    fn from(entry: RawEntry) -> Self {
        match entry {
            RawEntry::Text(text) => Self::Literal(text),
            RawEntry::Integer(value) => Self::Literal(value.to_string()),
            RawEntry::Float(value) => Self::Literal(value.to_string()),
            RawEntry::Bool(value) => Self::Literal(value.to_string()),
            RawEntry::Env {
                env,
            } => Self::Env(env),
            RawEntry::Command {
                command,
            } => Self::Command(command),
        }
    }
}

/// Configuration store loaded from a TOML or YAML document.
#[derive(Clone, Default)]
pub struct FileStore {
    namespaces: HashMap<Namespace, BTreeMap<String, Source>>,
}

impl fmt::Debug for FileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (namespace, sources) in &self.namespaces {
            map.entry(&namespace.to_string(), &sources.keys().collect::<Vec<_>>());
        }
        map.finish()
    }
}

impl FileStore {
    /// Load a store document. The format is picked by file extension.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read configuration store {}", path.display()))?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml")
        );
        let raw: BTreeMap<String, BTreeMap<String, RawEntry>> = if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse configuration store {}", path.display()))?
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse configuration store {}", path.display()))?
        };

        Self::from_raw(raw).with_context(|| format!("Invalid configuration store {}", path.display()))
    }

    /// Parse a TOML store document held in memory.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: BTreeMap<String, BTreeMap<String, RawEntry>> =
            toml::from_str(content).context("Failed to parse configuration store")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: BTreeMap<String, BTreeMap<String, RawEntry>>) -> Result<Self> {
        let mut namespaces = HashMap::new();
        for (name, entries) in raw {
            let namespace = Namespace::parse(&name)?;
            let mut sources = BTreeMap::new();
            for (key, entry) in entries {
                let source = Source::from(entry);
                if let Source::Command(argv) = &source
                    && argv.is_empty()
                {
                    bail!("Key '{key}' in namespace '{namespace}' has an empty command");
                }
                sources.insert(key, source);
            }
            namespaces.insert(namespace, sources);
        }
        Ok(Self {
            namespaces,
        })
    }

    fn source(&self, namespace: &Namespace, key: &str) -> Result<&Source, StoreError> {
        self.namespaces.get(namespace).and_then(|entries| entries.get(key)).ok_or_else(|| {
            StoreError::MissingKey {
                namespace: namespace.to_string(),
                key: key.to_string(),
            }
        })
    }
}

fn read_env(namespace: &Namespace, key: &str, variable: &str) -> Result<String, StoreError> {
    std::env::var(variable).map_err(|_| StoreError::EnvNotSet {
        namespace: namespace.to_string(),
        key: key.to_string(),
        variable: variable.to_string(),
    })
}

async fn run_source_command(argv: Vec<String>, label: String) -> Result<String> {
    tracing::debug!(target: "store", "Running source command for {label}");

    let (program, args) = argv.split_first().context("empty source command")?;
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to run source command '{program}' for {label}"))?;

    if !output.status.success() {
        bail!("Source command '{program}' for {label} exited with {}", output.status);
    }

    let mut value = String::from_utf8(output.stdout)
        .map_err(|_| anyhow::anyhow!("Source command '{program}' for {label} produced non-UTF-8 output"))?;
    if value.ends_with('\n') {
        value.pop();
        if value.ends_with('\r') {
            value.pop();
        }
    }
    Ok(value)
}

impl ConfigStore for FileStore {
    fn require_plain(&self, namespace: &Namespace, key: &str) -> Result<String, StoreError> {
        match self.source(namespace, key)? {
            Source::Literal(text) => Ok(text.clone()),
            Source::Env(variable) => read_env(namespace, key, variable),
            Source::Command(_) => Err(StoreError::CommandSourceNotSecret {
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
        match self.source(namespace, key)? {
            Source::Literal(text) => Ok(Deferred::secret(text.clone())),
            Source::Env(variable) => read_env(namespace, key, variable).map(Deferred::secret),
            Source::Command(argv) => {
                let label = format!("'{key}' in namespace '{namespace}'");
                Ok(Deferred::new(run_source_command(argv.clone(), label), true))
            }
        }
    }

    fn keys(&self, namespace: &Namespace) -> Vec<String> {
        self.namespaces
            .get(namespace)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;

    const DOCUMENT: &str = r#"
["svc"]
name = "alice"
port = 8080
debug = true
SECRET_API_KEY = { env = "PROVISOR_TEST_API_KEY" }

["lxc#db"]
SECRET_PASSWORD = { command = ["echo", "s3cret"] }
LEAKY = { command = ["echo", "nope"] }
"#;

    #[test]
    fn test_literals_are_stringified() {
        let store = FileStore::from_toml_str(DOCUMENT).unwrap();
        let svc = Namespace::parse("svc").unwrap();
        assert_eq!(store.require_plain(&svc, "name").unwrap(), "alice");
        assert_eq!(store.require_plain(&svc, "port").unwrap(), "8080");
        assert_eq!(store.require_plain(&svc, "debug").unwrap(), "true");
    }

    #[tokio::test]
    #[serial]
    async fn test_env_backed_secret() {
        let store = FileStore::from_toml_str(DOCUMENT).unwrap();
        let svc = Namespace::parse("svc").unwrap();

        // SAFETY: serialized test, no other thread reads the environment.
        unsafe { std::env::set_var("PROVISOR_TEST_API_KEY", "xyz") };
        let secret = store.require_secret(&svc, "SECRET_API_KEY").unwrap();
        unsafe { std::env::remove_var("PROVISOR_TEST_API_KEY") };

        assert_eq!(secret.into_secret().await.unwrap().expose_secret(), "xyz");
        assert!(matches!(
            store.require_secret(&svc, "SECRET_API_KEY"),
            Err(StoreError::EnvNotSet { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_backed_secret_is_deferred() {
        let store = FileStore::from_toml_str(DOCUMENT).unwrap();
        let db = Namespace::parse("lxc#db").unwrap();
        let secret = store.require_secret(&db, "SECRET_PASSWORD").unwrap();
        assert!(secret.is_secret());
        assert_eq!(secret.into_secret().await.unwrap().expose_secret(), "s3cret");
    }

    #[test]
    fn test_command_source_requires_secret_key() {
        let store = FileStore::from_toml_str(DOCUMENT).unwrap();
        let db = Namespace::parse("lxc#db").unwrap();
        assert!(matches!(
            store.require_plain(&db, "LEAKY"),
            Err(StoreError::CommandSourceNotSecret { .. })
        ));
    }

    #[test]
    fn test_empty_command_rejected() {
        let err = FileStore::from_toml_str("[\"svc\"]\nSECRET_X = { command = [] }\n").unwrap_err();
        assert!(err.to_string().contains("empty command"));
    }

    #[test]
    fn test_debug_lists_keys_only() {
        let store = FileStore::from_toml_str("[\"svc\"]\nSECRET_PIN = \"4711\"\nUSER = \"alice\"\n").unwrap();
        let debug = format!("{store:?}");
        assert!(debug.contains("SECRET_PIN"));
        assert!(!debug.contains("4711"));
        assert!(!debug.contains("alice"));
    }

    #[tokio::test]
    async fn test_load_yaml_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.yaml");
        fs::write(&path, "svc:\n  name: alice\n").await.unwrap();

        let store = FileStore::load(&path).await.unwrap();
        let svc = Namespace::parse("svc").unwrap();
        assert_eq!(store.require_plain(&svc, "name").unwrap(), "alice");
        assert_eq!(store.keys(&svc), ["name"]);
    }
}

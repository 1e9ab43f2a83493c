//! Recursive variable resolution.
//!
//! Resolution starts from the variable tokens of a template and runs in
//! passes:
//!
//! 1. Every token is addressed through [`crate::namespace`] and fetched from
//!    the [`ConfigStore`] with the plain or secret accessor. Missing keys are
//!    collected and reported together.
//! 2. The values fetched in the previous pass are scanned for further tokens.
//!    New tokens are fetched; tokens seen before are only re-scanned (their
//!    scan is memoized). Each pass that discovers anything deepens the
//!    resolution by one level.
//! 3. When a pass discovers nothing, every value that is itself a template is
//!    re-rendered `max_depth - 1` times against the evolving map, so nested
//!    references collapse into their final text.
//!
//! A reference chain longer than the number of distinct variables can only
//! come from a cycle and is reported as [`TemplateError::CircularReference`].
//!
//! While every value is plain, all of this runs synchronously and returns
//! [`ResolvedVariables::Ready`]. As soon as a pass has to scan a deferred
//! value, the remaining passes move into a secret [`Deferred`] continuation.

use anyhow::Context as _;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use strsim::levenshtein;

use super::error::TemplateError;
use super::extractor::parse_template;
use super::renderer::{TemplateData, render_text};
use crate::deferred::{Deferred, Value};
use crate::namespace::{self, Namespace, VariableRef};
use crate::store::{ConfigStore, StoreError};

/// Maximum Levenshtein distance, as a percentage of the name length, for suggestions.
const SIMILARITY_THRESHOLD_PERCENT: usize = 50;

/// Fully expanded variables, keyed by token as spelled in the template.
pub type VariableMap = BTreeMap<String, String>;

/// Outcome of a resolution.
#[derive(Clone)]
pub struct Resolution {
    pub variables: VariableMap,
    /// Length of the longest reference chain; 1 when no value references another.
    pub max_depth: usize,
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

/// Resolved variables, available now or only through a deferred handle.
#[derive(Debug, Clone)]
pub enum ResolvedVariables {
    Ready(Resolution),
    Deferred(Deferred<Resolution>),
}

impl ResolvedVariables {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }
}

#[derive(Debug, Clone, Default)]
struct Scan {
    references: BTreeSet<String>,
    uses_render_data: bool,
}

struct Expansion {
    store: Arc<dyn ConfigStore>,
    namespace: Namespace,
    values: BTreeMap<String, Value>,
    texts: HashMap<String, String>,
    scans: HashMap<String, Scan>,
    frontier: BTreeSet<String>,
    depth: usize,
}

impl Expansion {
    fn start(
        store: Arc<dyn ConfigStore>,
        namespace: Namespace,
        tokens: &BTreeSet<String>,
    ) -> Result<Self, TemplateError> {
        let mut expansion = Self {
            store,
            namespace,
            values: BTreeMap::new(),
            texts: HashMap::new(),
            scans: HashMap::new(),
            frontier: tokens.clone(),
            depth: 1,
        };
        let initial: Vec<String> = tokens.iter().cloned().collect();
        expansion.fetch(&initial)?;
        Ok(expansion)
    }

    /// Fetch tokens from the store, failing with every missing token at once.
    fn fetch(&mut self, tokens: &[String]) -> Result<(), TemplateError> {
        let mut missing = Vec::new();

        for token in tokens {
            let reference = namespace::resolve(token, &self.namespace)?;
            match self.store.fetch(&reference) {
                Ok(value) => {
                    tracing::trace!(
                        target: "resolver",
                        "Fetched '{}' from namespace '{}' (secret: {})",
                        token,
                        reference.namespace,
                        reference.secret
                    );
                    if let Value::Plain(text) = &value {
                        self.texts.insert(token.clone(), text.clone());
                    }
                    self.values.insert(token.clone(), value);
                }
                Err(StoreError::MissingKey {
                    ..
                }) => missing.push(token.clone()),
                Err(source) => {
                    return Err(TemplateError::Store {
                        token: token.clone(),
                        source,
                    });
                }
            }
        }

        if missing.is_empty() {
            return Ok(());
        }

        Err(TemplateError::MissingVariables {
            namespace: self.namespace.to_string(),
            suggestions: self.suggestions(&missing),
            found: self.values.keys().cloned().collect(),
            missing,
        })
    }

    fn suggestions(&self, missing: &[String]) -> Vec<String> {
        let mut scored = Vec::new();

        for token in missing {
            let Ok(reference) = VariableRef::parse(token) else {
                continue;
            };
            let Ok(target) = reference.target_namespace(&self.namespace) else {
                continue;
            };
            let prefix = &token[..token.len() - reference.name().len()];
            let limit = reference.name().len() * SIMILARITY_THRESHOLD_PERCENT / 100;

            for key in self.store.keys(&target) {
                let distance = levenshtein(reference.name(), &key);
                if distance <= limit {
                    scored.push((distance, format!("{prefix}{key}")));
                }
            }
        }

        scored.sort();
        scored.dedup_by(|a, b| a.1 == b.1);
        scored.into_iter().take(3).map(|(_, suggestion)| suggestion).collect()
    }

    /// Frontier tokens whose value has not been materialized yet.
    fn pending(&self) -> Vec<String> {
        self.frontier.iter().filter(|token| !self.texts.contains_key(*token)).cloned().collect()
    }

    fn scan(&mut self, token: &str) -> Result<&Scan, TemplateError> {
        if !self.scans.contains_key(token) {
            let text = self.texts.get(token).map(String::as_str).unwrap_or_default();
            let withhold = self.values.get(token).is_some_and(Value::is_secret);
            let parsed = parse_template(&format!("value of '{token}'"), text, withhold)?;
            self.scans.insert(
                token.to_string(),
                Scan {
                    references: parsed.variables,
                    uses_render_data: parsed.uses_render_data,
                },
            );
        }
        Ok(&self.scans[token])
    }

    /// Run one discovery pass. Returns `true` once nothing new is referenced.
    fn advance(&mut self) -> Result<bool, TemplateError> {
        let frontier: Vec<String> = self.frontier.iter().cloned().collect();
        let mut discovered = BTreeSet::new();
        for token in &frontier {
            discovered.extend(self.scan(token)?.references.iter().cloned());
        }

        if discovered.is_empty() {
            return Ok(true);
        }

        self.depth += 1;
        let new: Vec<String> =
            discovered.iter().filter(|token| !self.values.contains_key(*token)).cloned().collect();
        tracing::debug!(
            target: "resolver",
            "Depth {}: {} referenced variable(s), {} new",
            self.depth,
            discovered.len(),
            new.len()
        );
        self.fetch(&new)?;

        if self.depth > self.values.len() {
            return Err(TemplateError::CircularReference {
                variables: discovered.into_iter().collect(),
            });
        }

        self.frontier = discovered;
        Ok(false)
    }

    /// Open the pending deferred values of the frontier.
    async fn materialize(&mut self) -> anyhow::Result<()> {
        let pending = self.pending();
        if pending.is_empty() {
            return Ok(());
        }

        let values: Vec<Value> = pending.iter().map(|token| self.values[token].clone()).collect();
        let texts = Value::combine(values)
            .resolve()
            .await
            .map_err(|e| e.into_anyhow())
            .with_context(|| format!("Failed to resolve deferred variables: {}", pending.join(", ")))?;

        self.texts.extend(pending.into_iter().zip(texts));
        Ok(())
    }

    async fn finish(mut self, data: Option<TemplateData>) -> anyhow::Result<Resolution> {
        loop {
            self.materialize().await?;
            if self.advance()? {
                break;
            }
        }
        Ok(self.into_resolution(data.as_ref())?)
    }

    fn into_resolution(self, data: Option<&TemplateData>) -> Result<Resolution, TemplateError> {
        let withhold = self.values.values().any(Value::is_secret);
        let dynamic: Vec<&String> = self
            .values
            .keys()
            .filter(|token| {
                self.scans
                    .get(token.as_str())
                    .is_some_and(|scan| scan.uses_render_data || !scan.references.is_empty())
            })
            .collect();

        let mut variables: VariableMap = self
            .values
            .keys()
            .map(|token| (token.clone(), self.texts.get(token).cloned().unwrap_or_default()))
            .collect();

        // Top-level references are substituted by the final render, so
        // max_depth - 1 passes reach the closure.
        let passes = if dynamic.is_empty() {
            0
        } else {
            self.depth.saturating_sub(1).max(1)
        };

        for _ in 0..passes {
            for token in &dynamic {
                let original = self.texts.get(token.as_str()).map(String::as_str).unwrap_or_default();
                let label = format!("value of '{token}'");
                let rendered = render_text(&label, original, &variables, data, withhold)?;
                variables.insert((*token).clone(), rendered);
            }
        }

        tracing::debug!(
            target: "resolver",
            "Resolved {} variable(s) in namespace '{}' (max depth {}, {} re-render pass(es))",
            variables.len(),
            self.namespace,
            self.depth,
            passes
        );

        Ok(Resolution {
            variables,
            max_depth: self.depth,
        })
    }
}

/// Resolve `tokens` in `namespace`, following references between values.
///
/// Configuration errors (malformed tokens, parent of a root namespace,
/// missing keys) are returned immediately. Errors that can only be known
/// once a deferred value is opened surface from the deferred handle.
pub fn resolve_variables(
    store: Arc<dyn ConfigStore>,
    namespace: &Namespace,
    tokens: &BTreeSet<String>,
    data: Option<&TemplateData>,
) -> Result<ResolvedVariables, TemplateError> {
    let mut expansion = Expansion::start(store, namespace.clone(), tokens)?;

    loop {
        if !expansion.pending().is_empty() {
            tracing::debug!(
                target: "resolver",
                "Deferring resolution in namespace '{}' at depth {}",
                expansion.namespace,
                expansion.depth
            );
            let data = data.cloned();
            return Ok(ResolvedVariables::Deferred(Deferred::new(expansion.finish(data), true)));
        }
        if expansion.advance()? {
            break;
        }
    }

    expansion.into_resolution(data).map(ResolvedVariables::Ready)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn tokens(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| (*name).to_string()).collect()
    }

    fn ready(resolved: ResolvedVariables) -> Resolution {
        match resolved {
            ResolvedVariables::Ready(resolution) => resolution,
            ResolvedVariables::Deferred(_) => panic!("expected a synchronous resolution"),
        }
    }

    #[test]
    fn test_single_level_is_synchronous() {
        let svc = Namespace::parse("svc").unwrap();
        let store = MemoryStore::new().with_value(&svc, "name", "alice");
        let resolution =
            ready(resolve_variables(Arc::new(store), &svc, &tokens(&["name"]), None).unwrap());
        assert_eq!(resolution.max_depth, 1);
        assert_eq!(resolution.variables["name"], "alice");
    }

    #[test]
    fn test_recursive_value_expands_with_one_extra_pass() {
        let svc = Namespace::parse("svc").unwrap();
        let store = MemoryStore::new()
            .with_value(&svc, "GREETING", "Hi {{ NAME }}")
            .with_value(&svc, "NAME", "Bob");
        let resolution =
            ready(resolve_variables(Arc::new(store), &svc, &tokens(&["GREETING"]), None).unwrap());
        assert_eq!(resolution.max_depth, 2);
        assert_eq!(resolution.variables["GREETING"], "Hi Bob");
        assert_eq!(resolution.variables["NAME"], "Bob");
    }

    #[test]
    fn test_three_level_chain_reaches_closure() {
        let svc = Namespace::parse("svc").unwrap();
        let store = MemoryStore::new()
            .with_value(&svc, "A", "a-{{ B }}")
            .with_value(&svc, "B", "b-{{ C }}")
            .with_value(&svc, "C", "c");
        let resolution =
            ready(resolve_variables(Arc::new(store), &svc, &tokens(&["A"]), None).unwrap());
        assert_eq!(resolution.max_depth, 3);
        assert_eq!(resolution.variables["A"], "a-b-c");

        for value in resolution.variables.values() {
            let remaining = crate::templating::extract_variables(value).unwrap();
            assert!(remaining.iter().all(|token| !resolution.variables.contains_key(token)));
        }
    }

    #[test]
    fn test_shared_reference_does_not_inflate_depth() {
        let svc = Namespace::parse("svc").unwrap();
        let store = MemoryStore::new()
            .with_value(&svc, "URL", "{{ HOST }}:{{ PORT }}")
            .with_value(&svc, "HOST", "db")
            .with_value(&svc, "PORT", "5432");
        let resolution = ready(
            resolve_variables(Arc::new(store), &svc, &tokens(&["URL", "HOST"]), None).unwrap(),
        );
        assert_eq!(resolution.max_depth, 2);
        assert_eq!(resolution.variables["URL"], "db:5432");
    }

    #[test]
    fn test_cycle_is_reported() {
        let svc = Namespace::parse("svc").unwrap();
        let store = MemoryStore::new()
            .with_value(&svc, "A", "{{ B }}")
            .with_value(&svc, "B", "{{ A }}");
        let err = resolve_variables(Arc::new(store), &svc, &tokens(&["A"]), None).unwrap_err();
        assert!(matches!(err, TemplateError::CircularReference { .. }));
    }

    #[test]
    fn test_self_reference_is_reported() {
        let svc = Namespace::parse("svc").unwrap();
        let store = MemoryStore::new().with_value(&svc, "A", "again {{ A }}");
        let err = resolve_variables(Arc::new(store), &svc, &tokens(&["A"]), None).unwrap_err();
        assert!(matches!(err, TemplateError::CircularReference { .. }));
    }

    #[test]
    fn test_missing_lists_all_and_found() {
        let svc = Namespace::parse("svc").unwrap();
        let store = MemoryStore::new()
            .with_value(&svc, "DB_PORT", "5432")
            .with_value(&svc, "DB_HOSTS", "db");
        let err = resolve_variables(
            Arc::new(store),
            &svc,
            &tokens(&["DB_HOST", "DB_PORT", "DB_USER"]),
            None,
        )
        .unwrap_err();

        match err {
            TemplateError::MissingVariables {
                namespace,
                missing,
                found,
                suggestions,
            } => {
                assert_eq!(namespace, "svc");
                assert_eq!(missing, ["DB_HOST", "DB_USER"]);
                assert_eq!(found, ["DB_PORT"]);
                assert!(suggestions.contains(&"DB_HOSTS".to_string()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_parent_of_root_fails_before_lookup() {
        let root = Namespace::parse("svc").unwrap();
        let err = resolve_variables(Arc::new(MemoryStore::new()), &root, &tokens(&["parent.X"]), None)
            .unwrap_err();
        assert!(matches!(err, TemplateError::Reference(_)));
    }

    #[test]
    fn test_parent_and_explicit_lookups() {
        let web = Namespace::parse("lxc#web").unwrap();
        let lxc = Namespace::parse("lxc").unwrap();
        let db = Namespace::parse("lxc#db").unwrap();
        let store = MemoryStore::new()
            .with_value(&lxc, "DOMAIN", "example.com")
            .with_value(&db, "PORT", "5432")
            .with_value(&web, "URL", "db.{{ parent.DOMAIN }}:{{ ns.lxc.db.PORT }}");
        let resolution =
            ready(resolve_variables(Arc::new(store), &web, &tokens(&["URL"]), None).unwrap());
        assert_eq!(resolution.variables["URL"], "db.example.com:5432");
    }

    #[tokio::test]
    async fn test_secret_resolution_is_deferred() {
        let svc = Namespace::parse("svc").unwrap();
        let store = MemoryStore::new()
            .with_value(&svc, "name", "alice")
            .with_value(&svc, "SECRET_DSN", "postgres://{{ name }}@db");
        let resolved =
            resolve_variables(Arc::new(store), &svc, &tokens(&["SECRET_DSN"]), None).unwrap();

        let ResolvedVariables::Deferred(deferred) = resolved else {
            panic!("secret resolution must be deferred");
        };
        assert!(deferred.is_secret());
        let resolution = deferred.resolve().await.unwrap();
        assert_eq!(resolution.max_depth, 2);
        assert_eq!(resolution.variables["SECRET_DSN"], "postgres://alice@db");
    }

    #[tokio::test]
    async fn test_deferred_errors_do_not_leak_values() {
        let svc = Namespace::parse("svc").unwrap();
        let store = MemoryStore::new().with_value(&svc, "SECRET_BROKEN", "hunter2 {{ unclosed");
        let resolved =
            resolve_variables(Arc::new(store), &svc, &tokens(&["SECRET_BROKEN"]), None).unwrap();
        let ResolvedVariables::Deferred(deferred) = resolved else {
            panic!("secret resolution must be deferred");
        };
        let err = deferred.resolve().await.unwrap_err();
        assert!(!format!("{err:#}").contains("hunter2"));
    }
}

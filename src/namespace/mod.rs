//! Namespaces and variable reference addressing
//!
//! A [`Namespace`] is an ordered list of segments joined by `#`
//! (`lxc#web#grafana`). Variable tokens found in templates address one of
//! three namespaces:
//!
//! | Token                | Addressing                          |
//! |----------------------|-------------------------------------|
//! | `DB_HOST`            | current namespace                   |
//! | `parent.DOMAIN`      | current namespace minus last segment |
//! | `ns.lxc.db.DB_PORT`  | the literal namespace `lxc#db`      |
//!
//! A reference is secret when its bare name starts with `SECRET_`, compared
//! case-insensitively. Secrecy is decided from the name alone and never
//! changes afterwards.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::constants::{
    EXPLICIT_NAMESPACE_MARKER, NAMESPACE_DELIMITER, PARENT_NAMESPACE_MARKER,
    SECRET_VARIABLE_PREFIX,
};

/// Errors raised while parsing namespaces or addressing variables.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamespaceError {
    #[error("Namespace must not be empty")]
    Empty,

    #[error("Namespace '{namespace}' contains an empty segment")]
    EmptySegment {
        namespace: String,
    },

    /// `parent.NAME` used from a namespace with a single segment.
    #[error("Namespace '{namespace}' is a root namespace and has no parent")]
    ParentOfRoot {
        namespace: String,
    },

    #[error("Invalid variable reference '{token}': {reason}")]
    InvalidReference {
        token: String,
        reason: String,
    },
}

/// Hierarchical identifier scoping configuration lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    segments: Vec<String>,
}

impl Namespace {
    /// Parse a `#`-delimited namespace string.
    pub fn parse(namespace: &str) -> Result<Self, NamespaceError> {
        if namespace.is_empty() {
            return Err(NamespaceError::Empty);
        }
        Self::from_segments(namespace.split(NAMESPACE_DELIMITER))
    }

    /// Build a namespace from its segments, outermost first.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, NamespaceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(NamespaceError::Empty);
        }
        if segments.iter().any(String::is_empty) {
            return Err(NamespaceError::EmptySegment {
                namespace: segments.join(&NAMESPACE_DELIMITER.to_string()),
            });
        }
        Ok(Self {
            segments,
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// A root namespace has exactly one segment and no parent.
    pub fn is_root(&self) -> bool {
        self.segments.len() == 1
    }

    /// Append a segment.
    pub fn child(&self, segment: &str) -> Result<Self, NamespaceError> {
        if segment.is_empty() || segment.contains(NAMESPACE_DELIMITER) {
            return Err(NamespaceError::EmptySegment {
                namespace: format!("{self}{NAMESPACE_DELIMITER}{segment}"),
            });
        }
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self {
            segments,
        })
    }

    /// Remove the last segment. Fails for root namespaces.
    pub fn parent(&self) -> Result<Self, NamespaceError> {
        if self.is_root() {
            return Err(NamespaceError::ParentOfRoot {
                namespace: self.to_string(),
            });
        }
        Ok(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{NAMESPACE_DELIMITER}")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl FromStr for Namespace {
    type Err = NamespaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// How a variable token selects its namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Addressing {
    Local,
    Parent,
    Explicit(Namespace),
}

/// A parsed variable token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableRef {
    token: String,
    addressing: Addressing,
    name: String,
    secret: bool,
}

impl VariableRef {
    /// Split a token as spelled in a template into addressing mode and bare name.
    pub fn parse(token: &str) -> Result<Self, NamespaceError> {
        let invalid = |reason: &str| NamespaceError::InvalidReference {
            token: token.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = token.split('.').collect();
        if parts.iter().any(|part| part.is_empty()) {
            return Err(invalid("empty path segment"));
        }

        let (addressing, name) = match parts.as_slice() {
            [marker] if *marker == PARENT_NAMESPACE_MARKER || *marker == EXPLICIT_NAMESPACE_MARKER => {
                return Err(invalid("namespace marker without a variable name"));
            }
            [name] => (Addressing::Local, *name),
            [marker, name] if *marker == PARENT_NAMESPACE_MARKER => (Addressing::Parent, *name),
            [marker, ..] if *marker == PARENT_NAMESPACE_MARKER => {
                return Err(invalid("parent references take exactly one name, e.g. parent.NAME"));
            }
            [marker, segments @ .., name] if *marker == EXPLICIT_NAMESPACE_MARKER => {
                if segments.is_empty() {
                    return Err(invalid("explicit references need a namespace, e.g. ns.lxc.NAME"));
                }
                let namespace = Namespace::from_segments(segments.iter().copied())?;
                (Addressing::Explicit(namespace), *name)
            }
            _ => {
                return Err(invalid(
                    "attribute access is only allowed after the 'parent' or 'ns' markers",
                ));
            }
        };

        Ok(Self {
            token: token.to_string(),
            secret: is_secret_name(name),
            addressing,
            name: name.to_string(),
        })
    }

    /// The token exactly as spelled in the template.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The bare variable name looked up in the store.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addressing(&self) -> &Addressing {
        &self.addressing
    }

    pub fn is_secret(&self) -> bool {
        self.secret
    }

    /// The namespace this reference is looked up in, relative to `current`.
    pub fn target_namespace(&self, current: &Namespace) -> Result<Namespace, NamespaceError> {
        match &self.addressing {
            Addressing::Local => Ok(current.clone()),
            Addressing::Parent => current.parent(),
            Addressing::Explicit(namespace) => Ok(namespace.clone()),
        }
    }

    /// Path of this reference in a nested render context, e.g.
    /// `["ns", "lxc", "db", "DB_PORT"]`.
    pub fn context_path(&self) -> Vec<&str> {
        match &self.addressing {
            Addressing::Local => vec![self.name.as_str()],
            Addressing::Parent => vec![PARENT_NAMESPACE_MARKER, self.name.as_str()],
            Addressing::Explicit(namespace) => {
                let mut path = vec![EXPLICIT_NAMESPACE_MARKER];
                path.extend(namespace.segments().iter().map(String::as_str));
                path.push(self.name.as_str());
                path
            }
        }
    }
}

/// Outcome of resolving a token against a current namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    pub namespace: Namespace,
    pub name: String,
    pub secret: bool,
}

/// Resolve a token to `(target namespace, bare name, secret)`.
///
/// A parent-of-root request fails here, before any store access.
pub fn resolve(token: &str, current: &Namespace) -> Result<ResolvedRef, NamespaceError> {
    let reference = VariableRef::parse(token)?;
    Ok(ResolvedRef {
        namespace: reference.target_namespace(current)?,
        secret: reference.secret,
        name: reference.name,
    })
}

/// Prefix match, case-insensitive: `secret_token` is secret, `MY_SECRETARY` is not.
pub fn is_secret_name(name: &str) -> bool {
    name.get(..SECRET_VARIABLE_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(SECRET_VARIABLE_PREFIX))
}

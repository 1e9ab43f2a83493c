//! SSH connections and per-step overrides.

use secrecy::SecretString;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

/// How a connection authenticates.
#[derive(Clone)]
pub enum Credential {
    /// Private key file on the local machine.
    KeyFile(PathBuf),
    /// Inline private key material.
    Key(SecretString),
    Password(SecretString),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
            Self::Key(_) => f.write_str("Key([REDACTED])"),
            Self::Password(_) => f.write_str("Password([REDACTED])"),
        }
    }
}

/// A resolved SSH connection.
#[derive(Debug, Clone)]
pub struct Connection {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub credential: Credential,
}

/// Step-level connection fields. Unset fields fall through to the base
/// connection.
#[derive(Clone, Default, Deserialize)]
pub struct ConnectionOverride {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub private_key: Option<SecretString>,
    #[serde(default, alias = "private_key_path")]
    pub private_key_file: Option<PathBuf>,
    #[serde(default)]
    pub password: Option<SecretString>,
}

impl fmt::Debug for ConnectionOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOverride")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("port", &self.port)
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .field("private_key_file", &self.private_key_file)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ConnectionOverride {
    fn credential(&self) -> Option<Credential> {
        if let Some(key) = &self.private_key {
            return Some(Credential::Key(key.clone()));
        }
        if let Some(path) = &self.private_key_file {
            return Some(Credential::KeyFile(expand_home(path)));
        }
        self.password.clone().map(Credential::Password)
    }
}

impl Connection {
    /// Apply a step's override to this connection.
    ///
    /// An inline key wins over a key file, which wins over a password.
    #[must_use]
    pub fn with_override(&self, connection_override: Option<&ConnectionOverride>) -> Self {
        let Some(o) = connection_override else {
            return self.clone();
        };

        Self {
            host: o.host.clone().unwrap_or_else(|| self.host.clone()),
            user: o.user.clone().unwrap_or_else(|| self.user.clone()),
            port: o.port.unwrap_or(self.port),
            credential: o.credential().unwrap_or_else(|| self.credential.clone()),
        }
    }

    /// `user@host` form used in logs.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Expand a leading `~` in a key path.
pub(crate) fn expand_home(path: &std::path::Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn base() -> Connection {
        Connection {
            host: "10.0.0.5".to_string(),
            user: "root".to_string(),
            port: 22,
            credential: Credential::KeyFile(PathBuf::from("/keys/lxc")),
        }
    }

    #[test]
    fn test_no_override_keeps_base() {
        let merged = base().with_override(None);
        assert_eq!(merged.host, "10.0.0.5");
        assert!(matches!(merged.credential, Credential::KeyFile(_)));
    }

    #[test]
    fn test_override_fields_win_and_unset_fall_through() {
        let o = ConnectionOverride {
            user: Some("deploy".to_string()),
            port: Some(2222),
            ..Default::default()
        };
        let merged = base().with_override(Some(&o));
        assert_eq!(merged.host, "10.0.0.5");
        assert_eq!(merged.user, "deploy");
        assert_eq!(merged.port, 2222);
        assert!(matches!(merged.credential, Credential::KeyFile(ref p) if p == &PathBuf::from("/keys/lxc")));
    }

    #[test]
    fn test_inline_key_override() {
        let o: ConnectionOverride = toml::from_str(r#"private_key = "-----BEGIN KEY-----""#).unwrap();
        let merged = base().with_override(Some(&o));
        match &merged.credential {
            Credential::Key(key) => assert_eq!(key.expose_secret(), "-----BEGIN KEY-----"),
            other => panic!("unexpected credential {other:?}"),
        }
        assert!(!format!("{merged:?}").contains("BEGIN KEY"));
        assert!(!format!("{o:?}").contains("BEGIN KEY"));
    }
}

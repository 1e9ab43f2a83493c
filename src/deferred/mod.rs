//! Deferred values and the secret boundary
//!
//! Variables that are secret, or that come from an asynchronous source, are
//! carried through resolution and rendering as [`Deferred`] handles instead of
//! plain strings. A deferred handle is a shared, memoized future: cloning it is
//! cheap, and every clone observes the same outcome.
//!
//! Only protected sinks (the remote transport, the playbook runner and the
//! local artifact writer) open a secret handle. They do so through
//! [`Value::into_secret`] or [`Deferred::into_secret`], which yield a
//! [`SecretString`] that is zeroized on drop and redacted in `Debug` output.
//! Non-secret handles may also be awaited with [`Deferred::try_public`].
//!
//! ```rust,no_run
//! use provisor_cli::deferred::{Deferred, Value};
//! use secrecy::ExposeSecret;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let token = Value::Deferred(Deferred::secret("xyz".to_string()));
//! let greeting = Value::Plain("Hello".to_string());
//!
//! let joined = Value::combine(vec![greeting, token]).map(|parts| Ok(parts.join(" ")));
//! assert!(joined.is_secret());
//!
//! let secret = joined.into_secret().await?;
//! assert_eq!(secret.expose_secret(), "Hello xyz");
//! # Ok(())
//! # }
//! ```

use futures::future::{BoxFuture, FutureExt, Shared};
use secrecy::SecretString;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a deferred computation.
///
/// Cloneable so that every holder of a shared handle sees the same error.
/// The message is built from variable names and sources only, never from
/// the values being computed.
#[derive(Debug, Clone, Error)]
#[error("{0:#}")]
pub struct DeferredError(Arc<anyhow::Error>);

impl DeferredError {
    /// Recover the underlying error when this is the last holder, otherwise
    /// wrap the shared error.
    pub fn into_anyhow(self) -> anyhow::Error {
        match Arc::try_unwrap(self.0) {
            Ok(error) => error,
            Err(shared) => anyhow::Error::new(Self(shared)),
        }
    }

    /// Borrow the underlying error, e.g. to downcast it.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl From<anyhow::Error> for DeferredError {
    fn from(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }
}

#[derive(Debug, Error)]
#[error("a secret deferred value can only be opened by a protected sink")]
struct SecretAccessDenied;

/// A value whose computation is delayed until a protected sink needs it.
pub struct Deferred<T: Clone> {
    inner: Shared<BoxFuture<'static, Result<T, DeferredError>>>,
    secret: bool,
}

impl<T: Clone> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            secret: self.secret,
        }
    }
}

impl<T: Clone> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("secret", &self.secret).finish_non_exhaustive()
    }
}

impl<T> Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wrap an asynchronous computation.
    pub fn new<F>(future: F, secret: bool) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let inner = async move { future.await.map_err(DeferredError::from) }.boxed().shared();
        Self {
            inner,
            secret,
        }
    }

    /// An already-available, non-secret value.
    pub fn ready(value: T) -> Self {
        Self::new(async move { Ok(value) }, false)
    }

    /// An already-available secret value.
    pub fn secret(value: T) -> Self {
        Self::new(async move { Ok(value) }, true)
    }

    /// A handle that fails when opened.
    pub fn failed(error: anyhow::Error, secret: bool) -> Self {
        Self::new(async move { Err(error) }, secret)
    }

    /// Whether opening this handle would reveal secret material.
    pub fn is_secret(&self) -> bool {
        self.secret
    }

    /// Mark the handle as secret. Secrecy only ever spreads, it is never removed.
    #[must_use]
    pub fn mark_secret(mut self) -> Self {
        self.secret = true;
        self
    }

    /// Transform the eventual value. Secrecy is preserved.
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> anyhow::Result<U> + Send + 'static,
    {
        let inner = self.inner.clone();
        Deferred::new(
            async move {
                let value = inner.await.map_err(DeferredError::into_anyhow)?;
                f(value)
            },
            self.secret,
        )
    }

    /// Chain an asynchronous continuation. Secrecy is preserved.
    pub fn and_then<U, F, Fut>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        let inner = self.inner.clone();
        Deferred::new(
            async move {
                let value = inner.await.map_err(DeferredError::into_anyhow)?;
                f(value).await
            },
            self.secret,
        )
    }

    /// Await a non-secret handle. Secret handles are refused.
    pub async fn try_public(&self) -> anyhow::Result<T> {
        if self.secret {
            return Err(SecretAccessDenied.into());
        }
        self.inner.clone().await.map_err(DeferredError::into_anyhow)
    }

    /// Open the handle. Reserved for protected sinks inside this crate.
    pub(crate) async fn resolve(&self) -> Result<T, DeferredError> {
        self.inner.clone().await
    }
}

impl Deferred<String> {
    /// Open the handle as a [`SecretString`].
    pub async fn into_secret(self) -> Result<SecretString, DeferredError> {
        self.resolve().await.map(SecretString::new)
    }
}

/// A resolved variable value: either immediately available or deferred.
#[derive(Clone)]
pub enum Value {
    /// Plain, non-secret text available now.
    Plain(String),
    /// A value that must be awaited, and may be secret.
    Deferred(Deferred<String>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(text) => f.debug_tuple("Plain").field(text).finish(),
            Self::Deferred(deferred) => f.debug_tuple("Deferred").field(deferred).finish(),
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Plain(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Plain(value.to_string())
    }
}

impl From<Deferred<String>> for Value {
    fn from(value: Deferred<String>) -> Self {
        Self::Deferred(value)
    }
}

impl Value {
    /// The plain text, if this value is not deferred.
    pub fn as_plain(&self) -> Option<&str> {
        match self {
            Self::Plain(text) => Some(text),
            Self::Deferred(_) => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    pub fn is_secret(&self) -> bool {
        match self {
            Self::Plain(_) => false,
            Self::Deferred(deferred) => deferred.is_secret(),
        }
    }

    /// View this value as a deferred handle, wrapping plain text if needed.
    pub fn into_deferred(self) -> Deferred<String> {
        match self {
            Self::Plain(text) => Deferred::ready(text),
            Self::Deferred(deferred) => deferred,
        }
    }

    /// Combine values into one deferred handle producing all of them, in order.
    ///
    /// The result is secret when any input is secret. The first failing input
    /// fails the combination.
    pub fn combine<I>(values: I) -> Deferred<Vec<String>>
    where
        I: IntoIterator<Item = Value>,
    {
        let values: Vec<Value> = values.into_iter().collect();
        let secret = values.iter().any(Value::is_secret);

        Deferred::new(
            async move {
                let pending = values.into_iter().map(|value| async move {
                    match value {
                        Value::Plain(text) => Ok(text),
                        Value::Deferred(deferred) => deferred.resolve().await,
                    }
                });
                futures::future::try_join_all(pending).await.map_err(DeferredError::into_anyhow)
            },
            secret,
        )
    }

    /// Open the value for a protected sink.
    pub async fn into_secret(self) -> Result<SecretString, DeferredError> {
        match self {
            Self::Plain(text) => Ok(SecretString::new(text)),
            Self::Deferred(deferred) => deferred.into_secret().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_combine_preserves_order_and_secrecy() {
        let combined = Value::combine(vec![
            Value::Plain("a".to_string()),
            Value::Deferred(Deferred::secret("b".to_string())),
            Value::Deferred(Deferred::ready("c".to_string())),
        ]);
        assert!(combined.is_secret());
        assert_eq!(combined.resolve().await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_combine_without_secrets_is_public() {
        let combined = Value::combine(vec![
            Value::Plain("a".to_string()),
            Value::Deferred(Deferred::ready("b".to_string())),
        ]);
        assert!(!combined.is_secret());
        assert_eq!(combined.try_public().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_try_public_refuses_secret() {
        let secret = Deferred::secret("hunter2".to_string());
        let err = secret.try_public().await.unwrap_err();
        assert!(!err.to_string().contains("hunter2"));
    }

    #[tokio::test]
    async fn test_shared_future_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let deferred = Deferred::new(
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok("value".to_string())
            },
            false,
        );
        let copy = deferred.clone();
        assert_eq!(deferred.resolve().await.unwrap(), "value");
        assert_eq!(copy.resolve().await.unwrap(), "value");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_map_keeps_secret_flag_and_error() {
        let failing: Deferred<String> = Deferred::failed(anyhow::anyhow!("source down"), true);
        let mapped = failing.map(|text| Ok(text.len()));
        assert!(mapped.is_secret());
        let err = mapped.resolve().await.unwrap_err();
        assert!(err.to_string().contains("source down"));
    }

    #[tokio::test]
    async fn test_into_secret_opens_value() {
        let value = Value::Deferred(Deferred::secret("xyz".to_string()));
        let secret = value.into_secret().await.unwrap();
        assert_eq!(secret.expose_secret(), "xyz");
    }

    #[test]
    fn test_debug_redacts_deferred() {
        let value = Value::Deferred(Deferred::secret("hunter2".to_string()));
        let rendered = format!("{value:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("secret: true"));
    }
}

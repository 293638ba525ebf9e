//! Collaborators the pool builds handles with.
//!
//! Factories and credential resolvers are supplied by the application at
//! startup; the pool never reaches out to a vendor SDK on its own.

use std::env;
use std::fmt;
use std::sync::Arc;

use docindex_core::CoreResult;

/// Secret used to authenticate against an embedding provider.
///
/// `Debug` output is redacted so credentials never end up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl From<&str> for Credential {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Credential {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Source of the default credential when a caller does not pass one.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self) -> Option<Credential>;
}

impl<F> CredentialResolver for F
where
    F: Fn() -> Option<Credential> + Send + Sync,
{
    fn resolve(&self) -> Option<Credential> {
        self()
    }
}

/// Reads the credential from an environment variable at lookup time.
#[derive(Debug, Clone)]
pub struct EnvCredentialResolver {
    var: String,
}

impl EnvCredentialResolver {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

impl CredentialResolver for EnvCredentialResolver {
    fn resolve(&self) -> Option<Credential> {
        env::var(&self.var)
            .ok()
            .map(Credential::new)
            .filter(|c| !c.is_empty())
    }
}

/// Fixed credential (or none), for tests and single-tenant deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialResolver(Option<Credential>);

impl StaticCredentialResolver {
    pub fn new(credential: impl Into<Credential>) -> Self {
        Self(Some(credential.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl CredentialResolver for StaticCredentialResolver {
    fn resolve(&self) -> Option<Credential> {
        self.0.clone()
    }
}

/// Builds embedding-model handles.
///
/// Returning `CoreError::Configuration` signals a setup problem (unknown model,
/// rejected credential); `CoreError::Construction` signals a failed connection.
pub trait EmbeddingClientFactory: Send + Sync {
    type Client: ?Sized + Send + Sync;

    /// Provider name, used as the cache-key namespace (e.g. `openai`).
    fn provider(&self) -> &str;

    fn connect(&self, model_id: &str, credential: &Credential) -> CoreResult<Arc<Self::Client>>;
}

/// Opens vector-index clients from a path-like locator.
pub trait IndexClientFactory: Send + Sync {
    type Client: ?Sized + Send + Sync;

    fn open(&self, path: &str) -> CoreResult<Arc<Self::Client>>;
}

impl<F: EmbeddingClientFactory + ?Sized> EmbeddingClientFactory for Arc<F> {
    type Client = F::Client;

    fn provider(&self) -> &str {
        (**self).provider()
    }

    fn connect(&self, model_id: &str, credential: &Credential) -> CoreResult<Arc<Self::Client>> {
        (**self).connect(model_id, credential)
    }
}

impl<F: IndexClientFactory + ?Sized> IndexClientFactory for Arc<F> {
    type Client = F::Client;

    fn open(&self, path: &str) -> CoreResult<Arc<Self::Client>> {
        (**self).open(path)
    }
}

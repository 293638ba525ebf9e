//! Process-wide pool layering the embedding and index-client caches.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use docindex_core::{CoreError, CoreResult, PoolConfig, ProcessCell};

use crate::cache::{CacheStats, KeyedResourceCache};
use crate::factory::{
    Credential, CredentialResolver, EmbeddingClientFactory, EnvCredentialResolver,
    IndexClientFactory,
};

/// Lazily built, once-per-process pool slot. See [`ResourcePool::shared`].
pub type PoolCell<E, X> = ProcessCell<ResourcePool<E, X>>;

/// Occupancy of both caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub embeddings: CacheStats,
    pub index_clients: CacheStats,
}

/// Shared access point for embedding handles and vector-index clients.
///
/// Handles returned by the pool are owned by it; callers should fetch a handle
/// for each unit of work rather than keeping one around, since an evicted
/// handle is no longer the one other callers receive.
pub struct ResourcePool<E: EmbeddingClientFactory, X: IndexClientFactory> {
    config: PoolConfig,
    embedding_factory: E,
    index_factory: X,
    credentials: Box<dyn CredentialResolver>,
    embeddings: KeyedResourceCache<E::Client>,
    index_clients: KeyedResourceCache<X::Client>,
}

impl<E: EmbeddingClientFactory, X: IndexClientFactory> ResourcePool<E, X> {
    /// Build a pool. The default credential is read from the environment
    /// variable named by `config.credential_env`.
    pub fn new(config: PoolConfig, embedding_factory: E, index_factory: X) -> Self {
        let credentials = EnvCredentialResolver::new(config.credential_env.clone());
        let embeddings = KeyedResourceCache::new("embeddings", config.max_embedding_handles);
        let index_clients = KeyedResourceCache::new("index_clients", config.max_index_clients);

        info!(
            max_embedding_handles = config.max_embedding_handles,
            max_index_clients = config.max_index_clients,
            default_model = %config.default_embedding_model,
            "resource pool initialized"
        );

        Self {
            config,
            embedding_factory,
            index_factory,
            credentials: Box::new(credentials),
            embeddings,
            index_clients,
        }
    }

    /// Replace the default credential source.
    pub fn with_credentials(mut self, resolver: impl CredentialResolver + 'static) -> Self {
        self.credentials = Box::new(resolver);
        self
    }

    /// Return the pool stored in `cell`, building it on first use.
    ///
    /// Only the first call's configuration and factories are used. Later calls
    /// get the existing pool even if they pass a different configuration; the
    /// mismatch is logged and otherwise ignored.
    pub fn shared(
        cell: &PoolCell<E, X>,
        config: PoolConfig,
        embedding_factory: E,
        index_factory: X,
    ) -> Arc<Self> {
        let requested = config.clone();
        let pool = cell.get_or_init(|| Self::new(config, embedding_factory, index_factory));
        if pool.config != requested {
            debug!("resource pool already initialized; ignoring new configuration");
        }
        pool
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Cache key for an embedding model: `"{provider}::{model_id}"`.
    pub fn embedding_cache_key(&self, model_id: &str) -> String {
        format!("{}::{}", self.embedding_factory.provider(), model_id)
    }

    /// Fetch (or build) the embedding handle for `model_id`.
    ///
    /// - `model_id` defaults to the configured model when absent or empty;
    ///   any other value is used verbatim as part of the cache key
    /// - `credential` defaults to the pool's credential resolver
    /// - with no usable credential the call fails with `CoreError::Configuration`
    ///
    /// The credential is not part of the cache key: a hit returns the handle
    /// built with whichever credential constructed it.
    pub fn get_embeddings(
        &self,
        model_id: Option<&str>,
        credential: Option<&Credential>,
    ) -> CoreResult<Arc<E::Client>> {
        let model_id = model_id
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.config.default_embedding_model);

        let credential = match credential.filter(|c| !c.is_empty()) {
            Some(c) => c.clone(),
            None => self.credentials.resolve().ok_or_else(|| {
                CoreError::configuration(format!(
                    "no credential available for embedding model {model_id}"
                ))
            })?,
        };

        let key = self.embedding_cache_key(model_id);
        self.embeddings
            .get(&key, || self.embedding_factory.connect(model_id, &credential))
    }

    /// Fetch (or open) the index client for `path`.
    ///
    /// The path is used verbatim as the key; `/data/idx` and `/data/idx/` are
    /// different entries.
    pub fn get_index_client(&self, path: &str) -> CoreResult<Arc<X::Client>> {
        self.index_clients
            .get(path, || self.index_factory.open(path))
    }

    /// Drop every cached handle.
    pub fn clear(&self) {
        self.embeddings.clear();
        self.index_clients.clear();
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            embeddings: self.embeddings.stats(),
            index_clients: self.index_clients.stats(),
        }
    }

    pub fn embedding_cache(&self) -> &KeyedResourceCache<E::Client> {
        &self.embeddings
    }

    pub fn index_cache(&self) -> &KeyedResourceCache<X::Client> {
        &self.index_clients
    }
}

impl<E: EmbeddingClientFactory, X: IndexClientFactory> fmt::Debug for ResourcePool<E, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("config", &self.config)
            .field("embeddings", &self.embeddings)
            .field("index_clients", &self.index_clients)
            .finish()
    }
}

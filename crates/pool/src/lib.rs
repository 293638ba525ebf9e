//! `docindex-pool`: process-wide sharing of expensive client handles.
//!
//! Embedding-model handles and vector-index clients are costly to build (network
//! handshakes, on-disk index loading), so request handlers fetch them from a
//! [`ResourcePool`] instead of constructing their own. Each kind of handle lives
//! in a bounded [`KeyedResourceCache`] with least-recently-used eviction.
//!
//! The pool never calls into the handles it stores; what a handle can do is up
//! to the factories supplied at construction.

pub mod cache;
pub mod factory;
pub mod pool;

pub use cache::{CacheStats, KeyedResourceCache};
pub use factory::{
    Credential, CredentialResolver, EmbeddingClientFactory, EnvCredentialResolver,
    IndexClientFactory, StaticCredentialResolver,
};
pub use pool::{PoolCell, PoolStats, ResourcePool};

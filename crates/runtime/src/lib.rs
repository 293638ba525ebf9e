//! `docindex-runtime`: process wiring.
//!
//! Builds the resource pool, task registry and job scheduler once at startup
//! and hands them out as shared services ([`AppContext`]).

pub mod context;
pub mod document;
pub mod error;

pub use context::{AppContext, RuntimeStats, StatusView};
pub use document::{INDEX_DOCUMENT_KIND, index_document_handler};
pub use error::RuntimeError;

use docindex_core::CoreConfig;

/// Load configuration and install logging from it.
pub fn init_from_env() -> Result<CoreConfig, RuntimeError> {
    let config = CoreConfig::load()?;
    docindex_observability::init_with(&config.logging);
    tracing::info!(backend = %config.scheduler.backend, "configuration loaded");
    Ok(config)
}

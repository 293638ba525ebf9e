//! `docindex-core`: shared building blocks for the resource pool and job layers.
//!
//! This crate holds the error taxonomy, identifiers, configuration model and the
//! once-per-process cell. It has no knowledge of caches, tasks or backends.

pub mod cell;
pub mod config;
pub mod error;
pub mod id;

pub use cell::ProcessCell;
pub use config::{
    BackendKind, ConfigError, CoreConfig, LogFormat, LoggingConfig, PoolConfig, SchedulerConfig,
    TaskConfig,
};
pub use error::{CoreError, CoreResult};
pub use id::{JobId, TaskId};

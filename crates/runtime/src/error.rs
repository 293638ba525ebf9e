use thiserror::Error;

use docindex_core::{ConfigError, CoreError};
use docindex_jobs::SchedulerError;

/// Errors raised while wiring or driving the application services.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

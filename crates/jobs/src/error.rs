use thiserror::Error;

use docindex_core::JobId;

/// Errors returned synchronously by schedulers.
///
/// Failures of the work itself are never reported here; they are recorded on
/// the job (see [`crate::JobResult::error`]).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Missing or contradictory scheduler settings.
    #[error("scheduler configuration error: {0}")]
    Configuration(String),

    /// The broker could not be reached or rejected a command.
    #[error("broker error: {0}")]
    Broker(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// A job with this id is still queued or running.
    #[error("job already queued or running: {0}")]
    DuplicateJob(JobId),

    /// The scheduler no longer accepts work.
    #[error("scheduler is shut down")]
    ShutDown,

    /// A worker thread could not be started.
    #[error("failed to spawn worker: {0}")]
    Spawn(String),
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<::redis::RedisError> for SchedulerError {
    fn from(err: ::redis::RedisError) -> Self {
        SchedulerError::Broker(err.to_string())
    }
}

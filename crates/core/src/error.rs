//! Core error taxonomy.

use thiserror::Error;

/// Result type used by pool and wiring code.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced synchronously to callers of the core.
///
/// Failures of background work are never returned through this type at the
/// submission site; they are captured into job/task records and only become a
/// `WorkExecution` value when a caller converts a recorded failure explicitly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A required setting or secret is missing (credential, broker URL, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A client handle could not be constructed.
    #[error("construction failed: {0}")]
    Construction(String),

    /// A submitted unit of work failed while executing.
    #[error("work execution failed: {0}")]
    WorkExecution(String),

    /// An identifier was rejected (empty, too long, unsupported characters).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl CoreError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn construction(msg: impl Into<String>) -> Self {
        Self::Construction(msg.into())
    }

    pub fn work_execution(msg: impl Into<String>) -> Self {
        Self::WorkExecution(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

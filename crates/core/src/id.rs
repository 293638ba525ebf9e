//! Identifiers for tracked work.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Length of generated task identifiers.
pub const TASK_ID_LEN: usize = 12;

/// Upper bound for caller-supplied identifiers (they end up in broker keys).
pub const MAX_ID_LEN: usize = 128;

/// Identifier of an upload/processing task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

/// Identifier of a background job.
///
/// Job ids are strings rather than UUIDs because callers may supply their own
/// (for example reusing a task id so a single id can be polled on both sides).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

fn validate(raw: &str, name: &str) -> Result<(), CoreError> {
    if raw.is_empty() {
        return Err(CoreError::invalid_id(format!("{name}: empty")));
    }
    if raw.len() > MAX_ID_LEN {
        return Err(CoreError::invalid_id(format!(
            "{name}: longer than {MAX_ID_LEN} characters"
        )));
    }
    if let Some(c) = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
    {
        return Err(CoreError::invalid_id(format!(
            "{name}: unsupported character {c:?}"
        )));
    }
    Ok(())
}

macro_rules! impl_string_id {
    ($t:ty, $name:literal) => {
        impl $t {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                validate(s, $name)?;
                Ok(Self(s.to_string()))
            }
        }
    };
}

impl_string_id!(TaskId, "TaskId");
impl_string_id!(JobId, "JobId");

impl TaskId {
    /// Generate a short random identifier.
    pub fn generate() -> Self {
        let mut raw = Uuid::new_v4().simple().to_string();
        raw.truncate(TASK_ID_LEN);
        Self(raw)
    }
}

impl JobId {
    /// Generate a time-ordered identifier (UUIDv7).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl From<TaskId> for JobId {
    fn from(value: TaskId) -> Self {
        Self(value.0)
    }
}

impl From<&TaskId> for JobId {
    fn from(value: &TaskId) -> Self {
        Self(value.0.clone())
    }
}

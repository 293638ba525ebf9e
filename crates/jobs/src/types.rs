//! Job records and units of work.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use docindex_core::{CoreError, CoreResult, JobId};

/// Job execution status as seen by pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the queue.
    Queued,
    /// Picked up by a worker.
    Started,
    /// Handler returned a value.
    Finished,
    /// Handler failed, panicked, or no handler was registered.
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, serializable unit of work.
///
/// `kind` selects the handler (see [`crate::HandlerRegistry`]); `payload` is
/// passed to it unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub kind: String,
    #[serde(default)]
    pub payload: JsonValue,
}

impl WorkUnit {
    pub fn new(kind: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Status record of one submitted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub status: JobStatus,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Free-form metadata; always carries `queued_at` and `kind`.
    #[serde(default)]
    pub meta: Map<String, JsonValue>,
}

impl JobResult {
    /// Fresh record for a just-submitted unit.
    pub fn queued(job_id: JobId, unit: &WorkUnit) -> Self {
        Self::queued_at(job_id, unit, Utc::now())
    }

    pub fn queued_at(job_id: JobId, unit: &WorkUnit, queued_at: DateTime<Utc>) -> Self {
        let mut meta = Map::new();
        meta.insert("queued_at".into(), JsonValue::String(queued_at.to_rfc3339()));
        meta.insert("kind".into(), JsonValue::String(unit.kind.clone()));
        Self {
            job_id,
            status: JobStatus::Queued,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
            meta,
        }
    }

    pub fn mark_started(&mut self) {
        self.status = JobStatus::Started;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_finished(&mut self, result: JsonValue) {
        self.status = JobStatus::Finished;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn kind(&self) -> Option<&str> {
        self.meta.get("kind").and_then(JsonValue::as_str)
    }

    pub fn queued_time(&self) -> Option<DateTime<Utc>> {
        self.meta
            .get("queued_at")
            .and_then(JsonValue::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    /// Outcome of a terminal job; `None` while it is still queued or running.
    ///
    /// A failed job becomes `CoreError::WorkExecution` carrying the recorded
    /// error text.
    pub fn outcome(&self) -> Option<CoreResult<JsonValue>> {
        match self.status {
            JobStatus::Finished => Some(Ok(self.result.clone().unwrap_or(JsonValue::Null))),
            JobStatus::Failed => Some(Err(CoreError::work_execution(
                self.error.clone().unwrap_or_default(),
            ))),
            JobStatus::Queued | JobStatus::Started => None,
        }
    }
}

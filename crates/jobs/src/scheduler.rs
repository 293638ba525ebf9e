//! Backend abstraction.

use std::sync::Arc;

use docindex_core::JobId;

use crate::error::SchedulerError;
use crate::types::{JobResult, WorkUnit};

/// A place to submit work and poll its status.
pub trait JobScheduler: Send + Sync {
    /// Short backend name (`memory`, `redis`).
    fn name(&self) -> &'static str;

    /// Submit `unit` and return its job id without waiting for execution.
    ///
    /// A caller-supplied `job_id` is used as is; otherwise one is generated.
    fn enqueue(&self, unit: WorkUnit, job_id: Option<JobId>) -> Result<JobId, SchedulerError>;

    /// Current record of a job, or `None` if it is unknown.
    fn get_job(&self, job_id: &JobId) -> Option<JobResult>;

    /// Units submitted but not yet picked up by a worker.
    fn queue_length(&self) -> usize;
}

impl<S: JobScheduler + ?Sized> JobScheduler for Arc<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn enqueue(&self, unit: WorkUnit, job_id: Option<JobId>) -> Result<JobId, SchedulerError> {
        (**self).enqueue(unit, job_id)
    }

    fn get_job(&self, job_id: &JobId) -> Option<JobResult> {
        (**self).get_job(job_id)
    }

    fn queue_length(&self) -> usize {
        (**self).queue_length()
    }
}

//! Application services built once at process start.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use tracing::{info, warn};

use docindex_core::{CoreConfig, JobId, TaskId};
use docindex_jobs::{HandlerRegistry, JobResult, JobSchedulerFacade, SchedulerStats, WorkUnit};
use docindex_pool::{
    CredentialResolver, EmbeddingClientFactory, IndexClientFactory, PoolStats, ResourcePool,
};
use docindex_tasks::{TaskRegistry, TaskStats, TaskStatus, TaskUpdate, UploadTask};

use crate::error::RuntimeError;

/// What a poller sees for an id: the upload task if one exists, else the job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", content = "record", rename_all = "lowercase")]
pub enum StatusView {
    Task(UploadTask),
    Job(JobResult),
}

impl StatusView {
    pub fn is_terminal(&self) -> bool {
        match self {
            StatusView::Task(task) => task.is_terminal(),
            StatusView::Job(job) => job.is_terminal(),
        }
    }
}

/// Occupancy of every shared service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeStats {
    pub pool: PoolStats,
    pub tasks: TaskStats,
    pub scheduler: SchedulerStats,
}

/// Shared services handed to request handlers.
///
/// Built once with [`AppContext::bootstrap`]; clone the `Arc`s it exposes
/// rather than building a second context.
pub struct AppContext<E: EmbeddingClientFactory, X: IndexClientFactory> {
    config: CoreConfig,
    pool: Arc<ResourcePool<E, X>>,
    tasks: Arc<TaskRegistry>,
    scheduler: Arc<JobSchedulerFacade>,
}

impl<E: EmbeddingClientFactory, X: IndexClientFactory> AppContext<E, X> {
    /// Build pool, registry and scheduler.
    ///
    /// `handlers` receives the pool and registry so job handlers can use them.
    pub fn bootstrap<C, H>(
        config: CoreConfig,
        embedding_factory: E,
        index_factory: X,
        credentials: C,
        handlers: H,
    ) -> Result<Self, RuntimeError>
    where
        C: CredentialResolver + 'static,
        H: FnOnce(&Arc<ResourcePool<E, X>>, &Arc<TaskRegistry>) -> HandlerRegistry,
    {
        config.validate()?;

        let pool = Arc::new(
            ResourcePool::new(config.pool.clone(), embedding_factory, index_factory)
                .with_credentials(credentials),
        );
        let tasks = Arc::new(TaskRegistry::from_config(&config.tasks));
        let handlers = Arc::new(handlers(&pool, &tasks));
        let scheduler = Arc::new(JobSchedulerFacade::from_config(&config.scheduler, handlers)?);

        info!(
            backend = scheduler.backend_name(),
            max_tasks = tasks.capacity(),
            "application context ready"
        );
        Ok(Self {
            config,
            pool,
            tasks,
            scheduler,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ResourcePool<E, X>> {
        &self.pool
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub fn scheduler(&self) -> &Arc<JobSchedulerFacade> {
        &self.scheduler
    }

    /// Register an upload and queue its processing.
    ///
    /// The unit is submitted as `kind` with payload
    /// `{"task_id": <id>, "document": <payload>}` and the task id doubles as the
    /// job id, so one id can be polled. If the unit cannot be queued the task
    /// is marked failed and the error returned.
    pub fn submit_document(
        &self,
        filename: impl Into<String>,
        phase: impl Into<String>,
        topic: impl Into<String>,
        kind: &str,
        payload: JsonValue,
    ) -> Result<TaskId, RuntimeError> {
        let task = self.tasks.create_task(filename, phase, topic);
        let task_id = task.task_id;
        let unit = WorkUnit::new(kind, json!({ "task_id": task_id.as_str(), "document": payload }));

        match self.scheduler.enqueue(unit, Some(JobId::from(&task_id))) {
            Ok(_) => Ok(task_id),
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "failed to queue document");
                let update = TaskUpdate::new()
                    .status(TaskStatus::Failed)
                    .message("Failed to queue processing")
                    .error(e.to_string());
                if let Err(update_err) = self.tasks.update_task(&task_id, update) {
                    warn!(task_id = %task_id, error = %update_err, "could not record queue failure");
                }
                Err(e.into())
            }
        }
    }

    /// Status for `id`. Malformed or unknown ids are `None`.
    ///
    /// The upload task wins unless it is still open while its job has already
    /// ended; then the job record is the fresher answer (for example a job
    /// that failed before touching the task).
    pub fn poll(&self, id: &str) -> Option<StatusView> {
        let task = id
            .parse::<TaskId>()
            .ok()
            .and_then(|task_id| self.tasks.get_task(&task_id));
        if let Some(task) = task.as_ref().filter(|t| t.is_terminal()) {
            return Some(StatusView::Task(task.clone()));
        }

        let job = id
            .parse::<JobId>()
            .ok()
            .and_then(|job_id| self.scheduler.get_job(&job_id));
        match (task, job) {
            (_, Some(job)) if job.is_terminal() => Some(StatusView::Job(job)),
            (Some(task), _) => Some(StatusView::Task(task)),
            (None, job) => job.map(StatusView::Job),
        }
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            pool: self.pool.stats(),
            tasks: self.tasks.stats(),
            scheduler: self.scheduler.stats(),
        }
    }

    /// Stop background workers and drop cached handles.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.pool.clear();
        info!("application context shut down");
    }
}

impl<E: EmbeddingClientFactory, X: IndexClientFactory> std::fmt::Debug for AppContext<E, X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("pool", &self.pool)
            .field("tasks", &self.tasks)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

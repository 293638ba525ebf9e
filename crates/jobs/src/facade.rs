//! Backend selection and the single entry point callers submit work through.

use std::sync::Arc;
#[cfg(feature = "redis")]
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::{info, warn};

use docindex_core::{BackendKind, JobId, ProcessCell, SchedulerConfig};

#[cfg(feature = "redis")]
use crate::broker::{BrokerWorker, BrokerWorkerHandle, DistributedBackend};
use crate::error::SchedulerError;
use crate::handlers::HandlerRegistry;
use crate::memory::InProcessBackend;
use crate::scheduler::JobScheduler;
use crate::types::{JobResult, WorkUnit};

/// Once-per-process facade slot. See [`JobSchedulerFacade::shared`].
pub type SchedulerCell = ProcessCell<JobSchedulerFacade>;

/// The backends a facade can run on.
#[derive(Debug)]
pub enum SchedulerBackend {
    InProcess(InProcessBackend),
    #[cfg(feature = "redis")]
    Distributed(DistributedBackend),
}

impl SchedulerBackend {
    /// Build the backend `config.backend` asks for.
    ///
    /// - `memory`: in-process workers
    /// - `redis`: broker backend; a missing URL or unreachable broker is an error
    /// - `auto`: broker backend if a URL is configured and the broker answers,
    ///   otherwise in-process (the failure is logged, not returned)
    pub fn from_config(
        config: &SchedulerConfig,
        handlers: Arc<HandlerRegistry>,
    ) -> Result<Self, SchedulerError> {
        match config.backend {
            BackendKind::Memory => Self::in_process(config, handlers),
            BackendKind::Redis => Self::distributed(config),
            BackendKind::Auto => {
                if config.broker_url().is_none() {
                    info!("no broker configured; using in-process job backend");
                    return Self::in_process(config, handlers);
                }
                match Self::distributed(config) {
                    Ok(backend) => Ok(backend),
                    Err(e) => {
                        warn!(error = %e, "broker unavailable; falling back to in-process job backend");
                        Self::in_process(config, handlers)
                    }
                }
            }
        }
    }

    fn in_process(
        config: &SchedulerConfig,
        handlers: Arc<HandlerRegistry>,
    ) -> Result<Self, SchedulerError> {
        Ok(SchedulerBackend::InProcess(InProcessBackend::start(
            config, handlers,
        )?))
    }

    #[cfg(feature = "redis")]
    fn distributed(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        Ok(SchedulerBackend::Distributed(DistributedBackend::from_config(
            config,
        )?))
    }

    #[cfg(not(feature = "redis"))]
    fn distributed(_config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        Err(SchedulerError::Configuration(
            "redis backend requested but docindex-jobs was built without the `redis` feature"
                .into(),
        ))
    }

    fn scheduler(&self) -> &dyn JobScheduler {
        match self {
            SchedulerBackend::InProcess(backend) => backend,
            #[cfg(feature = "redis")]
            SchedulerBackend::Distributed(backend) => backend,
        }
    }
}

impl JobScheduler for SchedulerBackend {
    fn name(&self) -> &'static str {
        self.scheduler().name()
    }

    fn enqueue(&self, unit: WorkUnit, job_id: Option<JobId>) -> Result<JobId, SchedulerError> {
        self.scheduler().enqueue(unit, job_id)
    }

    fn get_job(&self, job_id: &JobId) -> Option<JobResult> {
        self.scheduler().get_job(job_id)
    }

    fn queue_length(&self) -> usize {
        self.scheduler().queue_length()
    }
}

/// Scheduler statistics for monitoring endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub backend: String,
    pub queue_length: usize,
}

/// Entry point for submitting and polling background work.
///
/// On the broker backend the facade also runs `scheduler.worker_threads`
/// local [`BrokerWorker`]s, so units submitted here get processed without a
/// separate worker process. Workers elsewhere may consume the same queue.
#[derive(Debug)]
pub struct JobSchedulerFacade {
    backend: SchedulerBackend,
    config: SchedulerConfig,
    #[cfg(feature = "redis")]
    broker_workers: Mutex<Vec<BrokerWorkerHandle>>,
}

impl JobSchedulerFacade {
    pub fn from_config(
        config: &SchedulerConfig,
        handlers: Arc<HandlerRegistry>,
    ) -> Result<Self, SchedulerError> {
        let backend = SchedulerBackend::from_config(config, handlers.clone())?;

        #[cfg(feature = "redis")]
        let broker_workers = match &backend {
            SchedulerBackend::Distributed(_) => Self::spawn_broker_workers(config, &handlers)?,
            SchedulerBackend::InProcess(_) => Vec::new(),
        };

        info!(backend = backend.name(), "job scheduler ready");
        Ok(Self {
            backend,
            config: config.clone(),
            #[cfg(feature = "redis")]
            broker_workers: Mutex::new(broker_workers),
        })
    }

    #[cfg(feature = "redis")]
    fn spawn_broker_workers(
        config: &SchedulerConfig,
        handlers: &Arc<HandlerRegistry>,
    ) -> Result<Vec<BrokerWorkerHandle>, SchedulerError> {
        (0..config.worker_threads.max(1))
            .map(|i| {
                BrokerWorker::from_config(config, handlers.clone())?
                    .with_name(format!("broker-worker-{i}"))
                    .spawn()
            })
            .collect()
    }

    /// Return the facade stored in `cell`, building it on first use.
    ///
    /// A failed construction leaves the cell empty. Once built, later calls get
    /// the same facade regardless of the configuration they pass.
    pub fn shared(
        cell: &SchedulerCell,
        config: &SchedulerConfig,
        handlers: Arc<HandlerRegistry>,
    ) -> Result<Arc<Self>, SchedulerError> {
        cell.get_or_try_init(|| Self::from_config(config, handlers))
    }

    pub fn backend(&self) -> &SchedulerBackend {
        &self.backend
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn enqueue(&self, unit: WorkUnit, job_id: Option<JobId>) -> Result<JobId, SchedulerError> {
        self.backend.enqueue(unit, job_id)
    }

    pub fn get_job(&self, job_id: &JobId) -> Option<JobResult> {
        self.backend.get_job(job_id)
    }

    pub fn queue_length(&self) -> usize {
        self.backend.queue_length()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            backend: self.backend_name().to_string(),
            queue_length: self.queue_length(),
        }
    }

    /// Stop local workers.
    ///
    /// In-process workers get up to `scheduler.shutdown_timeout_ms`. Broker
    /// workers finish the unit they hold; anything still queued stays on the
    /// broker for the next consumer.
    pub fn shutdown(&self) {
        match &self.backend {
            SchedulerBackend::InProcess(backend) => {
                backend.shutdown(self.config.shutdown_timeout());
            }
            #[cfg(feature = "redis")]
            SchedulerBackend::Distributed(_) => {
                let workers = std::mem::take(
                    &mut *self.broker_workers.lock().unwrap_or_else(PoisonError::into_inner),
                );
                for worker in &workers {
                    worker.request_stop();
                }
                for worker in workers {
                    worker.shutdown();
                }
            }
        }
    }
}

impl JobScheduler for JobSchedulerFacade {
    fn name(&self) -> &'static str {
        self.backend_name()
    }

    fn enqueue(&self, unit: WorkUnit, job_id: Option<JobId>) -> Result<JobId, SchedulerError> {
        JobSchedulerFacade::enqueue(self, unit, job_id)
    }

    fn get_job(&self, job_id: &JobId) -> Option<JobResult> {
        JobSchedulerFacade::get_job(self, job_id)
    }

    fn queue_length(&self) -> usize {
        JobSchedulerFacade::queue_length(self)
    }
}

//! In-process backend: a FIFO queue drained by worker threads.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use docindex_core::{JobId, SchedulerConfig};

use crate::error::SchedulerError;
use crate::handlers::HandlerRegistry;
use crate::scheduler::JobScheduler;
use crate::types::{JobResult, WorkUnit};

/// How often `shutdown` checks whether workers have exited.
const JOIN_POLL: Duration = Duration::from_millis(10);

enum QueueItem {
    Run { job_id: JobId, unit: WorkUnit },
    Stop,
}

struct Queue {
    items: VecDeque<QueueItem>,
    accepting: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
    jobs: Mutex<HashMap<JobId, JobResult>>,
    handlers: Arc<HandlerRegistry>,
    poll_interval: Duration,
    max_records: usize,
}

impl Shared {
    fn lock_queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<JobId, JobResult>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until an item is available. Wakes every poll interval; returns
    /// `None` once the queue is closed and drained.
    fn next_item(&self) -> Option<QueueItem> {
        let mut queue = self.lock_queue();
        loop {
            if let Some(item) = queue.items.pop_front() {
                return Some(item);
            }
            if !queue.accepting {
                return None;
            }
            let (guard, _) = self
                .available
                .wait_timeout(queue, self.poll_interval)
                .unwrap_or_else(PoisonError::into_inner);
            queue = guard;
        }
    }

    fn update<F: FnOnce(&mut JobResult)>(&self, job_id: &JobId, apply: F) {
        if let Some(record) = self.lock_jobs().get_mut(job_id) {
            apply(record);
        }
    }

    fn run(&self, worker: &str, job_id: JobId, unit: WorkUnit) {
        self.update(&job_id, JobResult::mark_started);
        debug!(worker, job_id = %job_id, kind = %unit.kind, "job started");

        match self.handlers.execute(&unit) {
            Ok(value) => {
                self.update(&job_id, |r| r.mark_finished(value));
                info!(worker, job_id = %job_id, kind = %unit.kind, "job finished");
            }
            Err(error) => {
                warn!(worker, job_id = %job_id, kind = %unit.kind, error = %error, "job failed");
                self.update(&job_id, |r| r.mark_failed(error));
            }
        }
    }
}

/// Drop the oldest finished records until a new one fits under `max`.
/// Queued and running jobs are never dropped.
fn prune_finished(jobs: &mut HashMap<JobId, JobResult>, max: usize) {
    if jobs.len() < max {
        return;
    }
    let mut finished: Vec<_> = jobs
        .values()
        .filter(|r| r.is_terminal())
        .map(|r| (r.finished_at, r.job_id.clone()))
        .collect();
    finished.sort_unstable();

    let excess = jobs.len() + 1 - max;
    for (_, job_id) in finished.into_iter().take(excess) {
        jobs.remove(&job_id);
    }
    debug!(remaining = jobs.len(), "pruned finished job records");
}

fn worker_loop(shared: Arc<Shared>, name: String) {
    debug!(worker = %name, "worker started");
    while let Some(item) = shared.next_item() {
        match item {
            QueueItem::Run { job_id, unit } => shared.run(&name, job_id, unit),
            QueueItem::Stop => break,
        }
    }
    debug!(worker = %name, "worker stopped");
}

/// Worker-thread backend.
///
/// - `enqueue` records the job as queued and returns immediately
/// - workers take units in submission order; with one worker, execution is
///   strictly FIFO
/// - no retries: a failed unit stays failed
/// - records live in memory and are lost with the process
pub struct InProcessBackend {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    shutdown_timeout: Duration,
}

impl InProcessBackend {
    /// Start `config.worker_threads` workers (at least one).
    pub fn start(
        config: &SchedulerConfig,
        handlers: Arc<HandlerRegistry>,
    ) -> Result<Self, SchedulerError> {
        let worker_count = config.worker_threads.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                items: VecDeque::new(),
                accepting: true,
            }),
            available: Condvar::new(),
            jobs: Mutex::new(HashMap::new()),
            handlers,
            poll_interval: config.poll_interval(),
            max_records: config.max_job_records.max(1),
        });

        let backend = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            worker_count,
            shutdown_timeout: config.shutdown_timeout(),
        };

        for i in 0..worker_count {
            let name = format!("worker-{i}");
            let shared = backend.shared.clone();
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(shared, name));
            match spawned {
                Ok(handle) => backend.lock_workers().push(handle),
                // dropping `backend` stops the workers started so far
                Err(e) => return Err(SchedulerError::Spawn(e.to_string())),
            }
        }

        info!(workers = worker_count, "in-process job backend started");
        Ok(backend)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Stop accepting work and wait up to `timeout` for workers to exit.
    ///
    /// Units already queued ahead of the stop markers still run. Returns
    /// `true` if every worker exited in time; stragglers are left detached.
    /// Calling this again is a no-op.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        {
            let mut queue = self.shared.lock_queue();
            if !queue.accepting {
                return self.lock_workers().is_empty();
            }
            queue.accepting = false;
            for _ in 0..self.worker_count {
                queue.items.push_back(QueueItem::Stop);
            }
        }
        self.shared.available.notify_all();

        let mut workers = std::mem::take(&mut *self.lock_workers());
        let deadline = Instant::now() + timeout;
        loop {
            let (finished, running): (Vec<_>, Vec<_>) =
                workers.into_iter().partition(|w| w.is_finished());
            for handle in finished {
                if handle.join().is_err() {
                    warn!("worker thread panicked");
                }
            }
            workers = running;
            if workers.is_empty() {
                info!("in-process job backend stopped");
                return true;
            }
            if Instant::now() >= deadline {
                warn!(
                    still_running = workers.len(),
                    "workers did not stop before the shutdown timeout"
                );
                return false;
            }
            thread::sleep(JOIN_POLL);
        }
    }

    pub fn is_shut_down(&self) -> bool {
        !self.shared.lock_queue().accepting
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JobScheduler for InProcessBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn enqueue(&self, unit: WorkUnit, job_id: Option<JobId>) -> Result<JobId, SchedulerError> {
        let job_id = job_id.unwrap_or_else(JobId::generate);

        let mut queue = self.shared.lock_queue();
        if !queue.accepting {
            return Err(SchedulerError::ShutDown);
        }
        {
            let mut jobs = self.shared.lock_jobs();
            if jobs.get(&job_id).is_some_and(|r| !r.is_terminal()) {
                return Err(SchedulerError::DuplicateJob(job_id));
            }
            if !jobs.contains_key(&job_id) {
                prune_finished(&mut jobs, self.shared.max_records);
            }
            jobs.insert(job_id.clone(), JobResult::queued(job_id.clone(), &unit));
        }
        debug!(job_id = %job_id, kind = %unit.kind, "job queued");
        queue.items.push_back(QueueItem::Run {
            job_id: job_id.clone(),
            unit,
        });
        drop(queue);

        self.shared.available.notify_one();
        Ok(job_id)
    }

    fn get_job(&self, job_id: &JobId) -> Option<JobResult> {
        self.shared.lock_jobs().get(job_id).cloned()
    }

    fn queue_length(&self) -> usize {
        self.shared
            .lock_queue()
            .items
            .iter()
            .filter(|item| matches!(item, QueueItem::Run { .. }))
            .count()
    }
}

impl Drop for InProcessBackend {
    fn drop(&mut self) {
        self.shutdown(self.shutdown_timeout);
    }
}

impl std::fmt::Debug for InProcessBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessBackend")
            .field("workers", &self.worker_count)
            .field("queue_length", &self.queue_length())
            .finish()
    }
}

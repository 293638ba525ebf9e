//! Redis-backed distributed backend.
//!
//! Layout, for queue name `q`:
//! - `q:queue` is a list of pending units; producers `LPUSH`
//! - `q:processing` holds units a worker has claimed (`BLMOVE` from the
//!   queue); an entry leaves it only together with the final status write
//! - `q:job:{id}` is a hash with `status`, `kind`, `queued_at`, `started_at`,
//!   `finished_at`, `result` (JSON text) and `error`
//!
//! Producers ([`DistributedBackend`]) and consumers ([`BrokerWorker`]) only
//! share the broker, so workers may run in other processes. Claimed units
//! whose worker went away are put back on the queue once they have been
//! pending longer than the pending timeout, so delivery is at least once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, error, info, instrument, warn};

use docindex_core::{JobId, SchedulerConfig};

use crate::error::SchedulerError;
use crate::handlers::HandlerRegistry;
use crate::scheduler::JobScheduler;
use crate::types::{JobResult, JobStatus, WorkUnit};

/// Upper bound on the connectivity check done at construction.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default time a claimed unit may stay unfinished before it is requeued.
pub const DEFAULT_PENDING_TIMEOUT: Duration = Duration::from_secs(600);

/// Map a broker status string onto [`JobStatus`].
///
/// Statuses written by other queue tooling (`deferred`, `scheduled`,
/// `stopped`, `canceled`) are folded into the four job states; anything
/// unrecognized counts as still queued.
pub fn status_from_broker(raw: &str) -> JobStatus {
    match raw {
        "queued" | "deferred" | "scheduled" => JobStatus::Queued,
        "started" => JobStatus::Started,
        "finished" => JobStatus::Finished,
        "failed" | "stopped" | "canceled" => JobStatus::Failed,
        _ => JobStatus::Queued,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueKeys {
    name: String,
}

impl QueueKeys {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    fn queue(&self) -> String {
        format!("{}:queue", self.name)
    }

    fn processing(&self) -> String {
        format!("{}:processing", self.name)
    }

    fn job(&self, job_id: &JobId) -> String {
        format!("{}:job:{}", self.name, job_id)
    }
}

/// What travels through the queue list.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    job_id: JobId,
    unit: WorkUnit,
}

fn parse_time(raw: Option<&String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Rebuild a job record from its broker hash. An empty hash is an unknown job.
///
/// A failed job always carries an error; jobs stopped or canceled by other
/// tooling get one naming that status.
fn record_from_hash(job_id: &JobId, fields: HashMap<String, String>) -> Option<JobResult> {
    if fields.is_empty() {
        return None;
    }

    let mut meta = Map::new();
    for key in ["queued_at", "kind"] {
        if let Some(value) = fields.get(key) {
            meta.insert(key.to_string(), JsonValue::String(value.clone()));
        }
    }

    let result = fields.get("result").map(|raw| {
        serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.clone()))
    });

    let raw_status = fields.get("status").map(String::as_str).unwrap_or("queued");
    let status = status_from_broker(raw_status);
    let error = fields
        .get("error")
        .filter(|e| !e.is_empty())
        .cloned()
        .or_else(|| (status == JobStatus::Failed).then(|| format!("job {raw_status}")));

    Some(JobResult {
        job_id: job_id.clone(),
        status,
        result,
        error,
        started_at: parse_time(fields.get("started_at")),
        finished_at: parse_time(fields.get("finished_at")),
        meta,
    })
}

fn open_client(url: &str) -> Result<redis::Client, SchedulerError> {
    redis::Client::open(url).map_err(|e| SchedulerError::Broker(e.to_string()))
}

/// Producer side of the broker queue.
pub struct DistributedBackend {
    client: redis::Client,
    keys: QueueKeys,
}

impl DistributedBackend {
    /// Open a client for `url` and check the broker answers `PING`.
    #[instrument(skip_all, fields(queue = %queue_name))]
    pub fn connect(url: &str, queue_name: &str) -> Result<Self, SchedulerError> {
        let client = open_client(url)?;
        let mut conn = client.get_connection_with_timeout(CONNECT_TIMEOUT)?;
        let _: String = redis::cmd("PING").query(&mut conn)?;

        info!("connected to job broker");
        Ok(Self {
            client,
            keys: QueueKeys::new(queue_name),
        })
    }

    pub fn from_config(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let url = config.broker_url().ok_or_else(|| {
            SchedulerError::Configuration("redis backend requires scheduler.broker_url".into())
        })?;
        Self::connect(url, &config.queue_name)
    }

    pub fn queue_name(&self) -> &str {
        &self.keys.name
    }

    fn connection(&self) -> Result<redis::Connection, SchedulerError> {
        Ok(self.client.get_connection()?)
    }

    fn fetch(&self, job_id: &JobId) -> Result<Option<JobResult>, SchedulerError> {
        let mut conn = self.connection()?;
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.keys.job(job_id))
            .query(&mut conn)?;
        Ok(record_from_hash(job_id, fields))
    }
}

impl JobScheduler for DistributedBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    /// The duplicate check and the push run under `WATCH` on the job hash, so
    /// of two producers racing on one id only one gets the job queued.
    #[instrument(skip_all, fields(queue = %self.keys.name, kind = %unit.kind))]
    fn enqueue(&self, unit: WorkUnit, job_id: Option<JobId>) -> Result<JobId, SchedulerError> {
        let job_id = job_id.unwrap_or_else(JobId::generate);
        let key = self.keys.job(&job_id);
        let queue = self.keys.queue();
        let kind = unit.kind.clone();
        let payload = serde_json::to_string(&Envelope {
            job_id: job_id.clone(),
            unit,
        })?;

        let mut conn = self.connection()?;
        let queued = redis::transaction(&mut conn, &[&key], |conn, pipe| {
            let existing: Option<String> =
                redis::cmd("HGET").arg(&key).arg("status").query(conn)?;
            if existing.is_some_and(|s| !status_from_broker(&s).is_terminal()) {
                return Ok(Some(false));
            }

            let queued_at = Utc::now().to_rfc3339();
            let committed: Option<()> = pipe
                .cmd("DEL")
                .arg(&key)
                .ignore()
                .cmd("HSET")
                .arg(&key)
                .arg("status")
                .arg(JobStatus::Queued.as_str())
                .arg("kind")
                .arg(&kind)
                .arg("queued_at")
                .arg(&queued_at)
                .ignore()
                .cmd("LPUSH")
                .arg(&queue)
                .arg(&payload)
                .ignore()
                .query(conn)?;
            // `None` means the watched hash changed; the transaction retries
            Ok(committed.map(|()| true))
        })?;

        if !queued {
            return Err(SchedulerError::DuplicateJob(job_id));
        }
        debug!(job_id = %job_id, "job queued on broker");
        Ok(job_id)
    }

    fn get_job(&self, job_id: &JobId) -> Option<JobResult> {
        match self.fetch(job_id) {
            Ok(record) => record,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "job lookup failed");
                None
            }
        }
    }

    fn queue_length(&self) -> usize {
        let len = self.connection().and_then(|mut conn| {
            redis::cmd("LLEN")
                .arg(self.keys.queue())
                .query::<usize>(&mut conn)
                .map_err(SchedulerError::from)
        });
        match len {
            Ok(len) => len,
            Err(e) => {
                error!(queue = %self.keys.name, error = %e, "queue length lookup failed");
                0
            }
        }
    }
}

impl std::fmt::Debug for DistributedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedBackend")
            .field("queue", &self.keys.name)
            .finish()
    }
}

/// Consumer side: claims units from the broker and runs them.
///
/// A unit is moved to the processing list when claimed and removed from it
/// in the same transaction that writes its final status. Anything left
/// behind (a crash, a lost connection) is requeued by
/// [`BrokerWorker::reclaim_pending`].
pub struct BrokerWorker {
    client: redis::Client,
    keys: QueueKeys,
    handlers: Arc<HandlerRegistry>,
    poll_interval: Duration,
    pending_timeout: Duration,
    name: String,
    /// Claimed entries seen without a `started` status, with when they were
    /// first seen. Such an entry may belong to a worker between its claim and
    /// its first status write.
    unstarted: Mutex<HashMap<String, Instant>>,
}

impl BrokerWorker {
    pub fn new(
        url: &str,
        queue_name: &str,
        handlers: Arc<HandlerRegistry>,
    ) -> Result<Self, SchedulerError> {
        Ok(Self {
            client: open_client(url)?,
            keys: QueueKeys::new(queue_name),
            handlers,
            poll_interval: Duration::from_secs(1),
            pending_timeout: DEFAULT_PENDING_TIMEOUT,
            name: "broker-worker".to_string(),
            unstarted: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(
        config: &SchedulerConfig,
        handlers: Arc<HandlerRegistry>,
    ) -> Result<Self, SchedulerError> {
        let url = config.broker_url().ok_or_else(|| {
            SchedulerError::Configuration("broker worker requires scheduler.broker_url".into())
        })?;
        Ok(Self::new(url, &config.queue_name, handlers)?
            .with_poll_interval(config.poll_interval())
            .with_pending_timeout(config.pending_timeout()))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout = timeout;
        self
    }

    /// Wait up to one poll interval for a unit and run it.
    ///
    /// Returns `Ok(false)` if nothing arrived. If a status write fails the
    /// unit stays on the processing list and is picked up again by
    /// [`BrokerWorker::reclaim_pending`].
    pub fn run_once(&self, conn: &mut redis::Connection) -> Result<bool, SchedulerError> {
        // blocking list commands take whole seconds on older servers
        let timeout = self.poll_interval.as_secs().max(1);
        let processing = self.keys.processing();
        let claimed: Option<String> = redis::cmd("BLMOVE")
            .arg(self.keys.queue())
            .arg(&processing)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout)
            .query(conn)?;
        let Some(payload) = claimed else {
            return Ok(false);
        };

        let envelope: Envelope = match serde_json::from_str(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(worker = %self.name, error = %e, "dropping undecodable queue entry");
                redis::cmd("LREM")
                    .arg(&processing)
                    .arg(1)
                    .arg(&payload)
                    .query::<()>(conn)?;
                return Ok(true);
            }
        };
        let key = self.keys.job(&envelope.job_id);

        redis::cmd("HSET")
            .arg(&key)
            .arg("status")
            .arg(JobStatus::Started.as_str())
            .arg("started_at")
            .arg(Utc::now().to_rfc3339())
            .query::<()>(conn)?;
        debug!(worker = %self.name, job_id = %envelope.job_id, kind = %envelope.unit.kind, "job started");

        let mut finish = redis::pipe();
        finish.atomic().cmd("HSET").arg(&key);
        match self.handlers.execute(&envelope.unit) {
            Ok(value) => {
                finish
                    .arg("status")
                    .arg(JobStatus::Finished.as_str())
                    .arg("result")
                    .arg(serde_json::to_string(&value)?);
                info!(worker = %self.name, job_id = %envelope.job_id, "job finished");
            }
            Err(err) => {
                warn!(worker = %self.name, job_id = %envelope.job_id, error = %err, "job failed");
                finish
                    .arg("status")
                    .arg(JobStatus::Failed.as_str())
                    .arg("error")
                    .arg(err);
            }
        }
        finish
            .arg("finished_at")
            .arg(Utc::now().to_rfc3339())
            .ignore()
            .cmd("LREM")
            .arg(&processing)
            .arg(1)
            .arg(&payload)
            .ignore()
            .query::<()>(conn)?;
        Ok(true)
    }

    /// Put stalled claimed units back on the queue and return how many were
    /// requeued.
    ///
    /// - `started` longer than the pending timeout ago: requeued
    /// - never marked started and seen by this worker for longer than the
    ///   pending timeout: requeued
    /// - already finished (the final write landed) or unknown: removed
    pub fn reclaim_pending(&self, conn: &mut redis::Connection) -> Result<usize, SchedulerError> {
        let processing = self.keys.processing();
        let entries: Vec<String> = redis::cmd("LRANGE")
            .arg(&processing)
            .arg(0)
            .arg(-1)
            .query(conn)?;

        let mut unstarted = self.lock_unstarted();
        unstarted.retain(|payload, _| entries.contains(payload));

        let mut requeued = 0;
        for payload in entries {
            let record = match serde_json::from_str::<Envelope>(&payload) {
                Ok(envelope) => {
                    let fields: HashMap<String, String> = redis::cmd("HGETALL")
                        .arg(self.keys.job(&envelope.job_id))
                        .query(conn)?;
                    record_from_hash(&envelope.job_id, fields).map(|r| (envelope, r))
                }
                Err(_) => None,
            };

            let stalled = match &record {
                None => {
                    redis::cmd("LREM").arg(&processing).arg(1).arg(&payload).query::<()>(conn)?;
                    continue;
                }
                Some((_, r)) if r.is_terminal() => {
                    redis::cmd("LREM").arg(&processing).arg(1).arg(&payload).query::<()>(conn)?;
                    continue;
                }
                Some((_, r)) if r.status == JobStatus::Started => r
                    .started_at
                    .and_then(|t| Utc::now().signed_duration_since(t).to_std().ok())
                    .is_some_and(|age| age >= self.pending_timeout),
                Some(_) => {
                    let first_seen = *unstarted.entry(payload.clone()).or_insert_with(Instant::now);
                    first_seen.elapsed() >= self.pending_timeout
                }
            };
            let Some((envelope, _)) = record.filter(|_| stalled) else {
                continue;
            };

            let key = self.keys.job(&envelope.job_id);
            redis::pipe()
                .atomic()
                .cmd("LREM")
                .arg(&processing)
                .arg(1)
                .arg(&payload)
                .ignore()
                .cmd("RPUSH")
                .arg(self.keys.queue())
                .arg(&payload)
                .ignore()
                .cmd("HSET")
                .arg(&key)
                .arg("status")
                .arg(JobStatus::Queued.as_str())
                .ignore()
                .cmd("HDEL")
                .arg(&key)
                .arg("started_at")
                .ignore()
                .query::<()>(conn)?;
            unstarted.remove(&payload);
            warn!(worker = %self.name, job_id = %envelope.job_id, "requeued stalled job");
            requeued += 1;
        }
        Ok(requeued)
    }

    /// Run the worker loop on its own thread until the handle is shut down.
    ///
    /// Broker errors are logged and the connection is re-established after a
    /// poll interval.
    pub fn spawn(self) -> Result<BrokerWorkerHandle, SchedulerError> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let join = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || self.run_until(&flag))
            .map_err(|e| SchedulerError::Spawn(e.to_string()))?;

        Ok(BrokerWorkerHandle {
            stop,
            join: Some(join),
        })
    }

    fn run_until(&self, stop: &AtomicBool) {
        info!(worker = %self.name, queue = %self.keys.name, "broker worker started");
        while !stop.load(Ordering::SeqCst) {
            let mut conn = match self.client.get_connection() {
                Ok(conn) => conn,
                Err(e) => {
                    error!(worker = %self.name, error = %e, "broker connection failed");
                    thread::sleep(self.poll_interval);
                    continue;
                }
            };
            while !stop.load(Ordering::SeqCst) {
                // reclaim while idle so stalled units do not wait behind new work
                let step = self.run_once(&mut conn).and_then(|worked| {
                    if !worked {
                        self.reclaim_pending(&mut conn)?;
                    }
                    Ok(())
                });
                if let Err(e) = step {
                    error!(worker = %self.name, error = %e, "broker worker iteration failed");
                    thread::sleep(self.poll_interval);
                    break;
                }
            }
        }
        info!(worker = %self.name, "broker worker stopped");
    }

    fn lock_unstarted(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.unstarted.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a running [`BrokerWorker`]. Dropping it asks the worker to stop
/// without waiting.
#[derive(Debug)]
pub struct BrokerWorkerHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl BrokerWorkerHandle {
    /// Ask the worker to stop after its current iteration.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop after the current iteration and wait for the thread to exit.
    pub fn shutdown(mut self) {
        self.request_stop();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("broker worker thread panicked");
            }
        }
    }
}

impl Drop for BrokerWorkerHandle {
    fn drop(&mut self) {
        self.request_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn broker_statuses_map_onto_job_states() {
        for (raw, expected) in [
            ("queued", JobStatus::Queued),
            ("deferred", JobStatus::Queued),
            ("scheduled", JobStatus::Queued),
            ("started", JobStatus::Started),
            ("finished", JobStatus::Finished),
            ("failed", JobStatus::Failed),
            ("stopped", JobStatus::Failed),
            ("canceled", JobStatus::Failed),
            ("something-new", JobStatus::Queued),
        ] {
            assert_eq!(status_from_broker(raw), expected, "{raw}");
        }
    }

    #[test]
    fn keys_are_namespaced_by_queue() {
        let keys = QueueKeys::new("docindex");
        let id: JobId = "abc123".parse().unwrap();
        assert_eq!(keys.queue(), "docindex:queue");
        assert_eq!(keys.processing(), "docindex:processing");
        assert_eq!(keys.job(&id), "docindex:job:abc123");
    }

    #[test]
    fn record_is_rebuilt_from_hash() {
        let id: JobId = "abc123".parse().unwrap();
        let fields: HashMap<String, String> = [
            ("status", "finished"),
            ("kind", "document.index"),
            ("queued_at", "2026-01-05T10:00:00+00:00"),
            ("started_at", "2026-01-05T10:00:01+00:00"),
            ("finished_at", "2026-01-05T10:00:03+00:00"),
            ("result", r#"{"chunks_indexed":4}"#),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let record = record_from_hash(&id, fields).unwrap();

        assert_eq!(record.status, JobStatus::Finished);
        assert_eq!(record.result, Some(json!({"chunks_indexed": 4})));
        assert_eq!(record.kind(), Some("document.index"));
        assert!(record.queued_time().is_some());
        assert!(record.started_at.unwrap() < record.finished_at.unwrap());
        assert!(record.error.is_none());
    }

    #[test]
    fn failed_statuses_without_error_get_one() {
        let id: JobId = "abc123".parse().unwrap();
        for (raw, expected) in [
            ("stopped", "job stopped"),
            ("canceled", "job canceled"),
            ("failed", "job failed"),
        ] {
            let fields = HashMap::from([("status".to_string(), raw.to_string())]);
            let record = record_from_hash(&id, fields).unwrap();
            assert_eq!(record.status, JobStatus::Failed);
            assert_eq!(record.error.as_deref(), Some(expected), "{raw}");
        }

        let fields = HashMap::from([
            ("status".to_string(), "stopped".to_string()),
            ("error".to_string(), "stopped by operator".to_string()),
        ]);
        let record = record_from_hash(&id, fields).unwrap();
        assert_eq!(record.error.as_deref(), Some("stopped by operator"));

        let fields = HashMap::from([("status".to_string(), "queued".to_string())]);
        assert!(record_from_hash(&id, fields).unwrap().error.is_none());
    }

    #[test]
    fn empty_hash_is_unknown_job() {
        let id: JobId = "nope".parse().unwrap();
        assert!(record_from_hash(&id, HashMap::new()).is_none());
    }

    #[test]
    fn unreachable_broker_fails_construction() {
        let err = DistributedBackend::connect("redis://127.0.0.1:1/", "docindex").unwrap_err();
        assert!(matches!(err, SchedulerError::Broker(_)));
    }

    #[test]
    fn missing_broker_url_is_a_configuration_error() {
        let config = SchedulerConfig::default();
        assert!(matches!(
            DistributedBackend::from_config(&config),
            Err(SchedulerError::Configuration(_))
        ));
    }

    /// Round trip against a live broker; runs only when
    /// `DOCINDEX_TEST_REDIS_URL` is set.
    #[test]
    fn round_trip_through_live_broker() {
        let Ok(url) = std::env::var("DOCINDEX_TEST_REDIS_URL") else {
            return;
        };
        let queue = format!("docindex-test-{}", JobId::generate());
        let handlers = Arc::new(
            HandlerRegistry::new()
                .with("double", |p| Ok(json!(p["n"].as_i64().unwrap_or(0) * 2)))
                .with("fail", |_| Err(anyhow::anyhow!("no such index"))),
        );
        let backend = DistributedBackend::connect(&url, &queue).unwrap();
        let worker = BrokerWorker::new(&url, &queue, handlers).unwrap();

        let ok = backend.enqueue(WorkUnit::new("double", json!({"n": 21})), None).unwrap();
        let bad = backend.enqueue(WorkUnit::new("fail", JsonValue::Null), None).unwrap();
        assert_eq!(backend.queue_length(), 2);
        assert_eq!(backend.get_job(&ok).unwrap().status, JobStatus::Queued);
        assert!(matches!(
            backend.enqueue(WorkUnit::new("double", JsonValue::Null), Some(ok.clone())),
            Err(SchedulerError::DuplicateJob(_))
        ));

        let mut conn = redis::Client::open(url.as_str()).unwrap().get_connection().unwrap();
        assert!(worker.run_once(&mut conn).unwrap());
        assert!(worker.run_once(&mut conn).unwrap());
        assert_eq!(backend.queue_length(), 0);
        let claimed: usize = redis::cmd("LLEN")
            .arg(format!("{queue}:processing"))
            .query(&mut conn)
            .unwrap();
        assert_eq!(claimed, 0);

        let done = backend.get_job(&ok).unwrap();
        assert_eq!(done.status, JobStatus::Finished);
        assert_eq!(done.result, Some(json!(42)));
        let failed = backend.get_job(&bad).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("no such index"));
        assert!(failed.finished_at.is_some());
    }

    /// A unit claimed by a worker that died mid-job goes back on the queue.
    #[test]
    fn stalled_claim_is_requeued_on_live_broker() {
        let Ok(url) = std::env::var("DOCINDEX_TEST_REDIS_URL") else {
            return;
        };
        let queue = format!("docindex-test-{}", JobId::generate());
        let handlers = Arc::new(HandlerRegistry::new().with("double", |p| {
            Ok(json!(p["n"].as_i64().unwrap_or(0) * 2))
        }));
        let backend = DistributedBackend::connect(&url, &queue).unwrap();
        let worker = BrokerWorker::new(&url, &queue, handlers)
            .unwrap()
            .with_pending_timeout(Duration::from_secs(60));
        let id = backend.enqueue(WorkUnit::new("double", json!({"n": 4})), None).unwrap();

        // a worker that claimed the unit and then went away
        let mut conn = redis::Client::open(url.as_str()).unwrap().get_connection().unwrap();
        let _: String = redis::cmd("LMOVE")
            .arg(format!("{queue}:queue"))
            .arg(format!("{queue}:processing"))
            .arg("RIGHT")
            .arg("LEFT")
            .query(&mut conn)
            .unwrap();
        let long_ago = (Utc::now() - chrono::Duration::minutes(5)).to_rfc3339();
        let _: () = redis::cmd("HSET")
            .arg(format!("{queue}:job:{id}"))
            .arg("status")
            .arg("started")
            .arg("started_at")
            .arg(long_ago)
            .query(&mut conn)
            .unwrap();
        assert_eq!(backend.queue_length(), 0);

        assert_eq!(worker.reclaim_pending(&mut conn).unwrap(), 1);
        assert_eq!(backend.queue_length(), 1);
        assert_eq!(backend.get_job(&id).unwrap().status, JobStatus::Queued);
        assert_eq!(worker.reclaim_pending(&mut conn).unwrap(), 0);

        assert!(worker.run_once(&mut conn).unwrap());
        let done = backend.get_job(&id).unwrap();
        assert_eq!(done.status, JobStatus::Finished);
        assert_eq!(done.result, Some(json!(8)));
        assert_eq!(worker.reclaim_pending(&mut conn).unwrap(), 0);
    }

    /// Two producers racing on one id: exactly one gets it queued.
    #[test]
    fn concurrent_enqueue_with_same_id_queues_once() {
        let Ok(url) = std::env::var("DOCINDEX_TEST_REDIS_URL") else {
            return;
        };
        let queue = format!("docindex-test-{}", JobId::generate());
        let backend = Arc::new(DistributedBackend::connect(&url, &queue).unwrap());
        let id = JobId::generate();

        let racers: Vec<_> = (0..8)
            .map(|_| {
                let backend = backend.clone();
                let id = id.clone();
                thread::spawn(move || backend.enqueue(WorkUnit::new("double", JsonValue::Null), Some(id)))
            })
            .collect();
        let queued = racers
            .into_iter()
            .map(|r| r.join().unwrap())
            .filter(|r| r.is_ok())
            .count();

        assert_eq!(queued, 1);
        assert_eq!(backend.queue_length(), 1);
    }
}

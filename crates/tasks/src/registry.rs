//! Bounded in-memory registry of upload tasks.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info};

use docindex_core::{TaskConfig, TaskId};

/// Message a task carries before any worker has touched it.
pub const INITIAL_MESSAGE: &str = "Waiting to start...";

/// Default number of tasks kept in memory.
pub const DEFAULT_MAX_TASKS: usize = 100;

/// Processing state of an upload task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Whether a task in this state may be moved to `next`.
    ///
    /// Staying in a non-terminal state is allowed (progress updates).
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Completed | Failed, _) => false,
            (Pending, Pending | Processing | Failed) => true,
            (Processing, Processing | Completed | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One document upload and its processing progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTask {
    pub task_id: TaskId,
    pub filename: String,
    pub phase: String,
    pub topic: String,
    pub status: TaskStatus,
    /// Percentage in `0..=100`.
    pub progress: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
}

impl UploadTask {
    fn new(
        task_id: TaskId,
        filename: impl Into<String>,
        phase: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            filename: filename.into(),
            phase: phase.into(),
            topic: topic.into(),
            status: TaskStatus::Pending,
            progress: 0,
            message: INITIAL_MESSAGE.to_string(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Partial update applied atomically by [`TaskRegistry::update_task`].
///
/// Progress is taken as a signed value and clamped to `0..=100`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<i64>,
    pub message: Option<String>,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: i64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn result(mut self, result: JsonValue) -> Self {
        self.result = Some(result);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// Task counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub capacity: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

struct Entry {
    /// Insertion order; breaks timestamp ties.
    seq: u64,
    task: UploadTask,
}

struct RegistryState {
    tasks: HashMap<TaskId, Entry>,
    next_seq: u64,
}

impl RegistryState {
    /// Oldest terminal task by completion time, else the oldest task overall.
    fn eviction_candidate(&self) -> Option<TaskId> {
        let oldest_terminal = self
            .tasks
            .values()
            .filter(|e| e.task.is_terminal())
            .min_by_key(|e| (e.task.completed_at.unwrap_or(e.task.created_at), e.seq));

        oldest_terminal
            .or_else(|| {
                self.tasks
                    .values()
                    .min_by_key(|e| (e.task.created_at, e.seq))
            })
            .map(|e| e.task.task_id.clone())
    }
}

/// Thread-safe, bounded store of [`UploadTask`] records.
///
/// - At most `capacity` tasks; creating one at capacity evicts first
/// - Terminal tasks are evicted before live ones
/// - Every read returns a clone; records are only changed through
///   [`TaskRegistry::update_task`]
pub struct TaskRegistry {
    capacity: usize,
    state: Mutex<RegistryState>,
}

impl TaskRegistry {
    /// Create an empty registry. A capacity of zero is raised to one.
    pub fn new(max_tasks: usize) -> Self {
        Self {
            capacity: max_tasks.max(1),
            state: Mutex::new(RegistryState {
                tasks: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    pub fn from_config(config: &TaskConfig) -> Self {
        Self::new(config.max_tasks)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock_state().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a new pending task and return a snapshot of it.
    pub fn create_task(
        &self,
        filename: impl Into<String>,
        phase: impl Into<String>,
        topic: impl Into<String>,
    ) -> UploadTask {
        let mut state = self.lock_state();

        if state.tasks.len() >= self.capacity {
            if let Some(evicted) = state.eviction_candidate() {
                state.tasks.remove(&evicted);
                info!(task_id = %evicted, "evicted task to make room");
            }
        }

        let mut task_id = TaskId::generate();
        while state.tasks.contains_key(&task_id) {
            task_id = TaskId::generate();
        }

        let task = UploadTask::new(task_id.clone(), filename, phase, topic);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.tasks.insert(
            task_id.clone(),
            Entry {
                seq,
                task: task.clone(),
            },
        );

        info!(task_id = %task_id, filename = %task.filename, "task created");
        task
    }

    pub fn get_task(&self, task_id: &TaskId) -> Option<UploadTask> {
        self.lock_state()
            .tasks
            .get(task_id)
            .map(|e| e.task.clone())
    }

    /// Apply `update` to a task.
    ///
    /// - unknown id: `Ok(None)`
    /// - first move to `Processing` stamps `started_at`
    /// - a terminal status stamps `completed_at`
    /// - an empty message is ignored
    /// - updating a terminal task, or an illegal status change, fails and
    ///   leaves the record untouched
    pub fn update_task(
        &self,
        task_id: &TaskId,
        update: TaskUpdate,
    ) -> Result<Option<UploadTask>, TaskError> {
        let mut state = self.lock_state();
        let Some(entry) = state.tasks.get_mut(task_id) else {
            debug!(task_id = %task_id, "update for unknown task ignored");
            return Ok(None);
        };
        let task = &mut entry.task;

        let from = task.status;
        let to = update.status.unwrap_or(from);
        if from.is_terminal() || !from.can_transition_to(to) {
            return Err(TaskError::InvalidTransition {
                task_id: task_id.clone(),
                from,
                to,
            });
        }

        let now = Utc::now();
        task.status = to;
        if to == TaskStatus::Processing && task.started_at.is_none() {
            task.started_at = Some(now);
        }
        if to.is_terminal() {
            task.completed_at = Some(now);
        }
        if let Some(progress) = update.progress {
            task.progress = clamp_progress(progress);
        }
        if let Some(message) = update.message.filter(|m| !m.is_empty()) {
            task.message = message;
        }
        if let Some(result) = update.result {
            task.result = Some(result);
        }
        if let Some(error) = update.error {
            task.error = Some(error);
        }

        if from != to {
            debug!(task_id = %task_id, from = %from, to = %to, "task status changed");
        }
        Ok(Some(task.clone()))
    }

    /// Up to `limit` tasks, newest first.
    pub fn list_tasks(&self, limit: usize) -> Vec<UploadTask> {
        let state = self.lock_state();
        let mut entries: Vec<&Entry> = state.tasks.values().collect();
        entries.sort_unstable_by(|a, b| {
            (b.task.created_at, b.seq).cmp(&(a.task.created_at, a.seq))
        });
        entries
            .into_iter()
            .take(limit)
            .map(|e| e.task.clone())
            .collect()
    }

    pub fn stats(&self) -> TaskStats {
        let state = self.lock_state();
        let mut stats = TaskStats {
            total: state.tasks.len(),
            capacity: self.capacity,
            ..TaskStats::default()
        };
        for entry in state.tasks.values() {
            match entry.task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    fn lock_state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TASKS)
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

fn clamp_progress(progress: i64) -> u8 {
    progress.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn complete(registry: &TaskRegistry, id: &TaskId) {
        registry
            .update_task(id, TaskUpdate::new().status(TaskStatus::Processing))
            .unwrap();
        registry
            .update_task(id, TaskUpdate::new().status(TaskStatus::Completed).progress(100))
            .unwrap();
    }

    #[test]
    fn new_task_is_pending_with_initial_message() {
        let registry = TaskRegistry::default();
        let task = registry.create_task("paper.pdf", "phase1", "methods");

        assert_eq!(task.task_id.as_str().len(), 12);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert_eq!(task.message, INITIAL_MESSAGE);
        assert!(task.started_at.is_none());
        assert_eq!(registry.get_task(&task.task_id), Some(task));
    }

    #[test]
    fn processing_and_completion_stamp_timestamps() {
        let registry = TaskRegistry::default();
        let id = registry.create_task("a.pdf", "p", "t").task_id;

        let processing = registry
            .update_task(
                &id,
                TaskUpdate::new()
                    .status(TaskStatus::Processing)
                    .progress(10)
                    .message("Starting document extraction..."),
            )
            .unwrap()
            .unwrap();
        let started_at = processing.started_at.expect("started_at stamped");
        assert!(processing.completed_at.is_none());

        // a second Processing update keeps the first start time
        let again = registry
            .update_task(&id, TaskUpdate::new().status(TaskStatus::Processing).progress(20))
            .unwrap()
            .unwrap();
        assert_eq!(again.started_at, Some(started_at));

        let done = registry
            .update_task(
                &id,
                TaskUpdate::new()
                    .status(TaskStatus::Completed)
                    .progress(100)
                    .result(json!({"chunks_indexed": 12})),
            )
            .unwrap()
            .unwrap();
        assert!(done.completed_at.is_some());
        assert_eq!(done.result, Some(json!({"chunks_indexed": 12})));
        assert_eq!(done.message, "Starting document extraction...");
    }

    #[test]
    fn empty_message_is_ignored() {
        let registry = TaskRegistry::default();
        let id = registry.create_task("a.pdf", "p", "t").task_id;
        let task = registry
            .update_task(&id, TaskUpdate::new().message(""))
            .unwrap()
            .unwrap();
        assert_eq!(task.message, INITIAL_MESSAGE);
    }

    #[test]
    fn unknown_task_is_none() {
        let registry = TaskRegistry::default();
        let missing: TaskId = "doesnotexist".parse().unwrap();
        assert_eq!(registry.update_task(&missing, TaskUpdate::new().progress(5)), Ok(None));
        assert!(registry.get_task(&missing).is_none());
    }

    #[test]
    fn terminal_tasks_are_immutable() {
        let registry = TaskRegistry::default();
        let id = registry.create_task("a.pdf", "p", "t").task_id;
        complete(&registry, &id);
        let before = registry.get_task(&id).unwrap();

        let err = registry
            .update_task(&id, TaskUpdate::new().progress(3).message("late"))
            .unwrap_err();
        assert_eq!(
            err,
            TaskError::InvalidTransition {
                task_id: id.clone(),
                from: TaskStatus::Completed,
                to: TaskStatus::Completed,
            }
        );
        assert!(registry
            .update_task(&id, TaskUpdate::new().status(TaskStatus::Processing))
            .is_err());
        assert_eq!(registry.get_task(&id).unwrap(), before);
    }

    #[test]
    fn pending_can_fail_but_not_complete() {
        let registry = TaskRegistry::default();
        let a = registry.create_task("a.pdf", "p", "t").task_id;
        let b = registry.create_task("b.pdf", "p", "t").task_id;

        assert!(registry
            .update_task(&a, TaskUpdate::new().status(TaskStatus::Completed))
            .is_err());
        let failed = registry
            .update_task(&b, TaskUpdate::new().status(TaskStatus::Failed).error("broker down"))
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.completed_at.is_some());
        assert!(failed.started_at.is_none());
    }

    #[test]
    fn eviction_prefers_terminal_tasks() {
        let registry = TaskRegistry::new(3);
        let t1 = registry.create_task("1.pdf", "p", "t").task_id;
        let t2 = registry.create_task("2.pdf", "p", "t").task_id;
        let t3 = registry.create_task("3.pdf", "p", "t").task_id;
        complete(&registry, &t2);

        let t4 = registry.create_task("4.pdf", "p", "t").task_id;

        assert_eq!(registry.len(), 3);
        assert!(registry.get_task(&t1).is_some());
        assert!(registry.get_task(&t2).is_none());
        assert!(registry.get_task(&t3).is_some());
        assert!(registry.get_task(&t4).is_some());
    }

    #[test]
    fn eviction_falls_back_to_oldest_task() {
        let registry = TaskRegistry::new(2);
        let t1 = registry.create_task("1.pdf", "p", "t").task_id;
        let t2 = registry.create_task("2.pdf", "p", "t").task_id;
        let t3 = registry.create_task("3.pdf", "p", "t").task_id;

        assert!(registry.get_task(&t1).is_none());
        assert!(registry.get_task(&t2).is_some());
        assert!(registry.get_task(&t3).is_some());
    }

    #[test]
    fn list_tasks_is_newest_first() {
        let registry = TaskRegistry::default();
        let ids: Vec<_> = (0..5)
            .map(|i| registry.create_task(format!("{i}.pdf"), "p", "t").task_id)
            .collect();

        let listed: Vec<_> = registry
            .list_tasks(3)
            .into_iter()
            .map(|t| t.task_id)
            .collect();
        assert_eq!(listed, vec![ids[4].clone(), ids[3].clone(), ids[2].clone()]);
    }

    #[test]
    fn stats_count_by_status() {
        let registry = TaskRegistry::new(10);
        let a = registry.create_task("a.pdf", "p", "t").task_id;
        let b = registry.create_task("b.pdf", "p", "t").task_id;
        registry.create_task("c.pdf", "p", "t");
        complete(&registry, &a);
        registry
            .update_task(&b, TaskUpdate::new().status(TaskStatus::Processing))
            .unwrap();

        let stats = registry.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.capacity, 10);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn task_serializes_with_lowercase_status() {
        let registry = TaskRegistry::default();
        let task = registry.create_task("a.pdf", "p", "t");
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["message"], INITIAL_MESSAGE);
        assert_eq!(value["task_id"], task.task_id.as_str());
    }

    proptest! {
        /// Property: any reported progress ends up within 0..=100.
        #[test]
        fn progress_is_clamped(raw in any::<i64>()) {
            let registry = TaskRegistry::new(1);
            let id = registry.create_task("a.pdf", "p", "t").task_id;
            let task = registry
                .update_task(&id, TaskUpdate::new().progress(raw))
                .unwrap()
                .unwrap();
            prop_assert!(task.progress <= 100);
            prop_assert_eq!(i64::from(task.progress), raw.clamp(0, 100));
        }
    }
}

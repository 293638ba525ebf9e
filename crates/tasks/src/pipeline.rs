//! Drives one uploaded document through indexing while reporting progress.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::{error, info, warn};

use docindex_core::TaskId;

use crate::registry::{TaskError, TaskRegistry, TaskStatus, TaskUpdate, UploadTask};

/// Document waiting to be indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRequest {
    /// Where the upload was staged.
    pub source: PathBuf,
    pub filename: String,
    pub phase: String,
    pub topic: String,
}

/// What the indexer reports for a successfully indexed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexOutcome {
    pub doc_id: String,
    pub chunks_indexed: usize,
    #[serde(default)]
    pub metadata: JsonValue,
}

/// Extracts, chunks and embeds a document into the vector index.
pub trait DocumentIndexer: Send + Sync {
    fn index_document(&self, request: &IndexRequest) -> anyhow::Result<IndexOutcome>;
}

/// Moves staged uploads to permanent storage, or throws them away.
pub trait DocumentArchive: Send + Sync {
    fn archive(&self, request: &IndexRequest) -> anyhow::Result<()>;
    fn discard(&self, request: &IndexRequest) -> anyhow::Result<()>;
}

impl<T: DocumentIndexer + ?Sized> DocumentIndexer for Arc<T> {
    fn index_document(&self, request: &IndexRequest) -> anyhow::Result<IndexOutcome> {
        (**self).index_document(request)
    }
}

impl<T: DocumentArchive + ?Sized> DocumentArchive for Arc<T> {
    fn archive(&self, request: &IndexRequest) -> anyhow::Result<()> {
        (**self).archive(request)
    }

    fn discard(&self, request: &IndexRequest) -> anyhow::Result<()> {
        (**self).discard(request)
    }
}

enum Failure {
    /// The indexer rejected the document.
    Indexing(anyhow::Error),
    /// Anything else went wrong (archiving, registry bookkeeping).
    Processing(anyhow::Error),
}

impl From<TaskError> for Failure {
    fn from(err: TaskError) -> Self {
        Failure::Processing(err.into())
    }
}

/// Runs indexing for registered upload tasks.
pub struct IndexingPipeline<I, A> {
    registry: Arc<TaskRegistry>,
    indexer: I,
    archive: A,
}

impl<I: DocumentIndexer, A: DocumentArchive> IndexingPipeline<I, A> {
    pub fn new(registry: Arc<TaskRegistry>, indexer: I, archive: A) -> Self {
        Self {
            registry,
            indexer,
            archive,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Index `request` on behalf of `task_id` and return the final task
    /// snapshot (`None` if the task is unknown, e.g. already evicted).
    ///
    /// Failures never escape: they are recorded on the task and the staged
    /// upload is discarded. A task that already finished is returned as is
    /// and the archive is left alone, so a redelivered job is harmless.
    pub fn run(&self, task_id: &TaskId, request: &IndexRequest) -> Option<UploadTask> {
        let Some(current) = self.registry.get_task(task_id) else {
            warn!(task_id = %task_id, "task not found; skipping indexing");
            return None;
        };
        if current.is_terminal() {
            info!(task_id = %task_id, status = %current.status, "task already finished; skipping indexing");
            return Some(current);
        }

        match self.drive(task_id, request) {
            Ok(task) => task,
            Err(failure) => {
                let (message, err) = match failure {
                    Failure::Indexing(err) => ("Indexing failed", err),
                    Failure::Processing(err) => ("Processing failed", err),
                };
                error!(task_id = %task_id, error = %err, "document indexing failed");

                let update = TaskUpdate::new()
                    .status(TaskStatus::Failed)
                    .progress(0)
                    .message(message)
                    .error(format!("{err:#}"));
                let task = match self.registry.update_task(task_id, update) {
                    Ok(task) => task,
                    Err(e) => {
                        warn!(task_id = %task_id, error = %e, "could not record failure");
                        self.registry.get_task(task_id)
                    }
                };

                // a completed task owns an archived document
                if task.as_ref().is_some_and(|t| t.status == TaskStatus::Completed) {
                    return task;
                }
                if let Err(e) = self.archive.discard(request) {
                    warn!(task_id = %task_id, error = %e, "failed to discard staged upload");
                }
                task
            }
        }
    }

    fn drive(&self, task_id: &TaskId, request: &IndexRequest) -> Result<Option<UploadTask>, Failure> {
        let step = |progress: i64, message: &str| -> Result<Option<UploadTask>, Failure> {
            let update = TaskUpdate::new()
                .status(TaskStatus::Processing)
                .progress(progress)
                .message(message);
            Ok(self.registry.update_task(task_id, update)?)
        };

        if step(10, "Starting document extraction...")?.is_none() {
            warn!(task_id = %task_id, "task not found; skipping indexing");
            return Ok(None);
        }
        step(20, "Extracting text and metadata...")?;

        let outcome = self
            .indexer
            .index_document(request)
            .map_err(Failure::Indexing)?;

        step(70, "Generating embeddings...")?;
        step(90, "Moving to permanent storage...")?;
        self.archive.archive(request).map_err(Failure::Processing)?;

        let update = TaskUpdate::new()
            .status(TaskStatus::Completed)
            .progress(100)
            .message(format!("Successfully indexed {} chunks", outcome.chunks_indexed))
            .result(json!({
                "doc_id": outcome.doc_id,
                "filename": request.filename,
                "chunks_indexed": outcome.chunks_indexed,
                "metadata": outcome.metadata,
            }));
        let task = self.registry.update_task(task_id, update)?;

        info!(
            task_id = %task_id,
            chunks_indexed = outcome.chunks_indexed,
            "document indexed"
        );
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingArchive {
        calls: Mutex<Vec<&'static str>>,
        fail_archive: bool,
    }

    impl DocumentArchive for RecordingArchive {
        fn archive(&self, _request: &IndexRequest) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("archive");
            if self.fail_archive {
                anyhow::bail!("storage volume is read-only");
            }
            Ok(())
        }

        fn discard(&self, _request: &IndexRequest) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("discard");
            Ok(())
        }
    }

    struct FixedIndexer(Result<usize, &'static str>);

    impl DocumentIndexer for FixedIndexer {
        fn index_document(&self, _request: &IndexRequest) -> anyhow::Result<IndexOutcome> {
            match self.0 {
                Ok(chunks) => Ok(IndexOutcome {
                    doc_id: "doc-42".to_string(),
                    chunks_indexed: chunks,
                    metadata: json!({"title": "On Caching"}),
                }),
                Err(msg) => Err(anyhow::anyhow!(msg)),
            }
        }
    }

    fn request() -> IndexRequest {
        IndexRequest {
            source: PathBuf::from("/tmp/uploads/paper.pdf"),
            filename: "paper.pdf".to_string(),
            phase: "phase1".to_string(),
            topic: "methods".to_string(),
        }
    }

    #[test]
    fn successful_run_completes_task_with_result() {
        let registry = Arc::new(TaskRegistry::default());
        let archive = Arc::new(RecordingArchive::default());
        let pipeline = IndexingPipeline::new(registry.clone(), FixedIndexer(Ok(12)), archive.clone());
        let id = registry.create_task("paper.pdf", "phase1", "methods").task_id;

        let task = pipeline.run(&id, &request()).unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert_eq!(task.message, "Successfully indexed 12 chunks");
        assert!(task.started_at.is_some());
        let result = task.result.unwrap();
        assert_eq!(result["doc_id"], "doc-42");
        assert_eq!(result["filename"], "paper.pdf");
        assert_eq!(result["chunks_indexed"], 12);
        assert_eq!(result["metadata"]["title"], "On Caching");
        assert_eq!(*archive.calls.lock().unwrap(), vec!["archive"]);
    }

    #[test]
    fn indexer_failure_marks_task_failed_and_discards_upload() {
        let registry = Arc::new(TaskRegistry::default());
        let archive = Arc::new(RecordingArchive::default());
        let pipeline = IndexingPipeline::new(
            registry.clone(),
            FixedIndexer(Err("no extractable text")),
            archive.clone(),
        );
        let id = registry.create_task("scan.pdf", "phase1", "methods").task_id;

        let task = pipeline.run(&id, &request()).unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.progress, 0);
        assert_eq!(task.message, "Indexing failed");
        assert_eq!(task.error.as_deref(), Some("no extractable text"));
        assert!(task.result.is_none());
        assert!(task.completed_at.is_some());
        assert_eq!(*archive.calls.lock().unwrap(), vec!["discard"]);
    }

    #[test]
    fn archive_failure_is_a_processing_failure() {
        let registry = Arc::new(TaskRegistry::default());
        let archive = Arc::new(RecordingArchive {
            fail_archive: true,
            ..Default::default()
        });
        let pipeline = IndexingPipeline::new(registry.clone(), FixedIndexer(Ok(3)), archive.clone());
        let id = registry.create_task("paper.pdf", "phase1", "methods").task_id;

        let task = pipeline.run(&id, &request()).unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.message, "Processing failed");
        assert!(task.error.unwrap().contains("read-only"));
        assert_eq!(*archive.calls.lock().unwrap(), vec!["archive", "discard"]);
    }

    #[test]
    fn unknown_task_is_skipped() {
        let registry = Arc::new(TaskRegistry::default());
        let archive = Arc::new(RecordingArchive::default());
        let pipeline = IndexingPipeline::new(registry, FixedIndexer(Ok(1)), archive.clone());
        let missing: TaskId = "gone".parse().unwrap();

        assert!(pipeline.run(&missing, &request()).is_none());
        assert!(archive.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn rerun_of_completed_task_keeps_archived_document() {
        let registry = Arc::new(TaskRegistry::default());
        let archive = Arc::new(RecordingArchive::default());
        let pipeline = IndexingPipeline::new(registry.clone(), FixedIndexer(Ok(5)), archive.clone());
        let id = registry.create_task("paper.pdf", "phase1", "methods").task_id;

        let first = pipeline.run(&id, &request()).unwrap();
        let second = pipeline.run(&id, &request()).unwrap();

        assert_eq!(second.status, TaskStatus::Completed);
        assert_eq!(second, first);
        assert_eq!(*archive.calls.lock().unwrap(), vec!["archive"]);
    }

    #[test]
    fn rerun_of_failed_task_does_not_index_again() {
        let registry = Arc::new(TaskRegistry::default());
        let archive = Arc::new(RecordingArchive::default());
        let pipeline = IndexingPipeline::new(
            registry.clone(),
            FixedIndexer(Err("no extractable text")),
            archive.clone(),
        );
        let id = registry.create_task("scan.pdf", "phase1", "methods").task_id;

        pipeline.run(&id, &request()).unwrap();
        let again = pipeline.run(&id, &request()).unwrap();

        assert_eq!(again.status, TaskStatus::Failed);
        assert_eq!(again.message, "Indexing failed");
        assert_eq!(*archive.calls.lock().unwrap(), vec!["discard"]);
    }
}

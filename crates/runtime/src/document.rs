//! Job handler that indexes submitted documents.

use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use docindex_core::TaskId;
use docindex_tasks::{DocumentArchive, DocumentIndexer, IndexRequest, IndexingPipeline, TaskStatus};

/// Job kind that runs [`index_document_handler`].
pub const INDEX_DOCUMENT_KIND: &str = "document.index";

/// Payload shape produced by `AppContext::submit_document`.
#[derive(Debug, Deserialize)]
struct IndexJob {
    task_id: TaskId,
    document: IndexRequest,
}

/// Handler running `pipeline` for a submitted document.
///
/// The job finishes with the task's result, or fails with the error the
/// pipeline recorded on the task.
pub fn index_document_handler<I, A>(
    pipeline: Arc<IndexingPipeline<I, A>>,
) -> impl Fn(&JsonValue) -> anyhow::Result<JsonValue> + Send + Sync + 'static
where
    I: DocumentIndexer + 'static,
    A: DocumentArchive + 'static,
{
    move |payload| {
        let job: IndexJob = serde_json::from_value(payload.clone())
            .context("invalid document.index payload")?;
        let task = pipeline
            .run(&job.task_id, &job.document)
            .ok_or_else(|| anyhow!("task {} no longer exists", job.task_id))?;

        if task.status == TaskStatus::Failed {
            bail!(task.error.unwrap_or(task.message));
        }
        Ok(task.result.unwrap_or(JsonValue::Null))
    }
}

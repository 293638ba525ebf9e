//! `docindex-tasks`: upload/processing task tracking.
//!
//! A [`TaskRegistry`] keeps a bounded set of [`UploadTask`] records that API
//! pollers read while background work reports progress into them. The
//! [`IndexingPipeline`] drives one document through the usual milestones.

pub mod pipeline;
pub mod registry;

pub use pipeline::{DocumentArchive, DocumentIndexer, IndexOutcome, IndexRequest, IndexingPipeline};
pub use registry::{TaskError, TaskRegistry, TaskStats, TaskStatus, TaskUpdate, UploadTask};

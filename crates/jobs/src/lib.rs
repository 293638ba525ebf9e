//! `docindex-jobs`: background execution behind one interface.
//!
//! Work is submitted as a named [`WorkUnit`] and resolved through a
//! [`HandlerRegistry`], so the same unit can run on worker threads inside this
//! process ([`InProcessBackend`]) or be pushed to a broker and picked up by a
//! broker worker elsewhere (`broker` module, `redis` feature).
//! [`JobSchedulerFacade`] picks the backend from configuration.
//!
//! Status semantics are the same on every backend: `queued` → `started` →
//! `finished` | `failed`, with terminal states final.

#[cfg(feature = "redis")]
pub mod broker;
pub mod error;
pub mod facade;
pub mod handlers;
pub mod memory;
pub mod scheduler;
pub mod types;

#[cfg(feature = "redis")]
pub use broker::{BrokerWorker, BrokerWorkerHandle, DistributedBackend};
pub use error::SchedulerError;
pub use facade::{JobSchedulerFacade, SchedulerBackend, SchedulerCell, SchedulerStats};
pub use handlers::{HandlerRegistry, JobHandler};
pub use memory::InProcessBackend;
pub use scheduler::JobScheduler;
pub use types::{JobResult, JobStatus, WorkUnit};

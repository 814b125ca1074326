//! Job scheduler.
//!
//! - `registry`: in-memory authority for job state, backed by the repository
//! - `queue`: FIFO of pending job ids
//! - `worker_pool`: bounded set of worker loops draining the queue
//! - `service`: the [`JobScheduler`] facade used by the API

mod queue;
mod registry;
mod service;
mod worker_pool;

pub use queue::JobQueue;
pub use registry::{CancelOutcome, JobRegistry};
pub use service::{JobScheduler, QueueStatus, RecoveryReport, SchedulerConfig};
pub use worker_pool::{WorkerPool, WorkerPoolConfig};

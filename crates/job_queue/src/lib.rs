//! Durable FIFO job queue and the generic worker pool that drains it.

mod config;
mod error;
mod pool;
mod queue;

pub use config::Config;
pub use error::JobQueueError;
pub use pool::{JobHandler, PoolMetrics, WorkerPool};
pub use queue::{JobDescriptor, JobQueue, MediaArtifact, MediaSource};

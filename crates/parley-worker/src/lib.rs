//! Parley worker
//!
//! Job submission and consumption for the avatar pipeline. [`PgJobQueue`] is the
//! durable Postgres-backed queue; [`MemoryJobQueue`] runs the same retry and
//! dead-letter policy in process.

pub mod context;
pub mod memory;
pub mod pg;
pub mod queue;

pub use context::JobHandlerContext;
pub use memory::MemoryJobQueue;
pub use pg::PgJobQueue;
pub use queue::{compute_retry_backoff_ms, JobQueue, JobQueueConfig, MAX_RETRY_BACKOFF_MS};

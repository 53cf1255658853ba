//! Job handler context trait
//!
//! The application implements this trait; the worker calls `dispatch_job` for
//! every claimed job and `dead_letter` once a job will not be retried again.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use parley_core::models::Job;

/// Context for job dispatch.
///
/// The queue holds a weak reference and upgrades it per job, so dropping the
/// application stops dispatch without a reference cycle.
#[async_trait]
pub trait JobHandlerContext: Send + Sync {
    /// Run a job. Return a [`parley_core::TaskError`] (via `anyhow`) to control
    /// whether a failure is retried.
    async fn dispatch_job(self: Arc<Self>, job: &Job) -> Result<()>;

    /// Called when a job exhausted its retries or failed unrecoverably. An error
    /// makes the queue call it again later, so it must be idempotent.
    async fn dead_letter(self: Arc<Self>, job: &Job, error: &str) -> Result<()>;
}

//! Queue contract and the retry policy shared by every backend.

use async_trait::async_trait;
use parley_core::models::Job;
use parley_core::{AppError, AvatarPipelineConfig, TaskError};
use uuid::Uuid;

/// Error recorded for a job dead-lettered without a handler error of its own.
pub(crate) const EXHAUSTED_ERROR: &str = "retry budget exhausted";

/// Upper bound for the delay before a failed job is retried.
pub const MAX_RETRY_BACKOFF_MS: u64 = 300_000;

/// Exponential backoff: `base_delay_ms * 2^retry_count`, capped.
#[inline]
pub fn compute_retry_backoff_ms(base_delay_ms: u64, retry_count: i32) -> u64 {
    let exponent = retry_count.clamp(0, 31) as u32;
    base_delay_ms
        .saturating_mul(2_u64.pow(exponent))
        .min(MAX_RETRY_BACKOFF_MS)
}

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub timeout_seconds: i32,
    pub max_retries: i32,
    pub retry_base_delay_ms: u64,
    /// Interval in seconds between runs of the stale job reaper. 0 = disabled.
    pub stale_reap_interval_secs: u64,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 1000,
            timeout_seconds: 300,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            stale_reap_interval_secs: 60,
        }
    }
}

impl From<&AvatarPipelineConfig> for JobQueueConfig {
    fn from(config: &AvatarPipelineConfig) -> Self {
        Self {
            max_workers: config.job_queue_max_workers,
            poll_interval_ms: config.job_queue_poll_interval_ms,
            timeout_seconds: config.job_queue_timeout_seconds,
            max_retries: config.job_queue_max_retries,
            retry_base_delay_ms: config.job_queue_retry_base_delay_ms,
            stale_reap_interval_secs: config.job_queue_stale_reap_interval_secs,
        }
    }
}

/// Producer side of a job queue
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job and return its id.
    async fn enqueue(
        &self,
        queue_name: &str,
        workspace_id: Option<Uuid>,
        payload: serde_json::Value,
    ) -> Result<Uuid, AppError>;
}

/// What to do with a job whose handler failed or timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureAction {
    Retry { delay_ms: u64 },
    DeadLetter,
}

/// Errors not wrapped in a [`TaskError`] are treated as recoverable.
pub(crate) fn is_unrecoverable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<TaskError>()
        .map(|te| !te.is_recoverable())
        .unwrap_or(false)
}

pub(crate) fn failure_action(job: &Job, unrecoverable: bool, config: &JobQueueConfig) -> FailureAction {
    if unrecoverable || !job.can_retry() {
        FailureAction::DeadLetter
    } else {
        FailureAction::Retry {
            delay_ms: compute_retry_backoff_ms(config.retry_base_delay_ms, job.retry_count),
        }
    }
}

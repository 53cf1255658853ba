//! In-process job queue: bounded channel plus a semaphore-limited worker pool.
//!
//! Applies the same timeout, retry and dead-letter policy as [`crate::PgJobQueue`]
//! but keeps nothing across restarts.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use uuid::Uuid;

use parley_core::models::{Job, JobStatus};
use parley_core::AppError;

use crate::context::JobHandlerContext;
use crate::queue::{
    compute_retry_backoff_ms, failure_action, is_unrecoverable, FailureAction, JobQueue,
    JobQueueConfig, EXHAUSTED_ERROR,
};

const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

pub struct MemoryJobQueue {
    tx: mpsc::Sender<Job>,
    config: JobQueueConfig,
    outstanding: Arc<watch::Sender<usize>>,
    shutdown_tx: mpsc::Sender<()>,
}

impl MemoryJobQueue {
    pub fn new(config: JobQueueConfig, context: Weak<dyn JobHandlerContext>) -> Self {
        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (outstanding, _) = watch::channel(0usize);
        let outstanding = Arc::new(outstanding);

        let worker_tx = tx.clone();
        let worker_config = config.clone();
        let worker_outstanding = outstanding.clone();
        tokio::spawn(async move {
            Self::worker_pool(rx, worker_tx, worker_config, context, worker_outstanding, shutdown_rx)
                .await;
        });

        tracing::info!(
            queue_size = DEFAULT_CHANNEL_CAPACITY,
            max_concurrent = config.max_workers,
            "In-memory job queue initialized"
        );

        Self {
            tx,
            config,
            outstanding,
            shutdown_tx,
        }
    }

    /// Resolves once every enqueued job has completed or been dead-lettered,
    /// including jobs waiting for a retry.
    pub async fn wait_idle(&self) {
        let mut rx = self.outstanding.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    async fn worker_pool(
        mut rx: mpsc::Receiver<Job>,
        tx: mpsc::Sender<Job>,
        config: JobQueueConfig,
        context: Weak<dyn JobHandlerContext>,
        outstanding: Arc<watch::Sender<usize>>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));

        loop {
            let job = tokio::select! {
                _ = shutdown_rx.recv() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let tx = tx.clone();
            let config = config.clone();
            let context = context.clone();
            let outstanding = outstanding.clone();

            tokio::spawn(async move {
                let _permit = permit;
                Self::process_job(job, tx, config, context, outstanding).await;
            });
        }

        tracing::info!("In-memory job queue stopped");
    }

    #[tracing::instrument(skip_all, fields(job.id = %job.id, job.queue = %job.queue_name))]
    async fn process_job(
        mut job: Job,
        tx: mpsc::Sender<Job>,
        config: JobQueueConfig,
        context: Weak<dyn JobHandlerContext>,
        outstanding: Arc<watch::Sender<usize>>,
    ) {
        let Some(ctx) = context.upgrade() else {
            tracing::error!(job_id = %job.id, "JobHandlerContext was dropped, cannot process job");
            outstanding.send_modify(|n| *n = n.saturating_sub(1));
            return;
        };

        job.status = JobStatus::Running;
        job.updated_at = Utc::now();

        if job.attempts_exhausted() {
            let error = job
                .last_error
                .clone()
                .unwrap_or_else(|| EXHAUSTED_ERROR.to_string());
            Self::dead_letter(job, error, ctx, tx, config, outstanding).await;
            return;
        }

        let timeout = Duration::from_secs(job.timeout_seconds.max(1) as u64);
        let (error, unrecoverable) =
            match tokio::time::timeout(timeout, ctx.clone().dispatch_job(&job)).await {
                Ok(Ok(())) => {
                    tracing::info!(job_id = %job.id, "Job completed successfully");
                    outstanding.send_modify(|n| *n = n.saturating_sub(1));
                    return;
                }
                Ok(Err(e)) => {
                    let unrecoverable = is_unrecoverable(&e);
                    (format!("{:#}", e), unrecoverable)
                }
                Err(_) => (
                    format!("Job execution timed out after {}s", job.timeout_seconds),
                    false,
                ),
            };

        tracing::error!(
            job_id = %job.id,
            error = %error,
            retry_count = job.retry_count,
            max_retries = job.max_retries,
            unrecoverable = unrecoverable,
            "Job execution failed"
        );

        match failure_action(&job, unrecoverable, &config) {
            FailureAction::Retry { delay_ms } => {
                job.retry_count += 1;
                Self::requeue(job, delay_ms, error, tx, outstanding);
            }
            FailureAction::DeadLetter => {
                Self::dead_letter(job, error, ctx, tx, config, outstanding).await;
            }
        }
    }

    /// Run the dead-letter hook. A failed hook is retried with backoff; the job
    /// stays outstanding until the hook succeeds.
    async fn dead_letter(
        mut job: Job,
        error: String,
        ctx: Arc<dyn JobHandlerContext>,
        tx: mpsc::Sender<Job>,
        config: JobQueueConfig,
        outstanding: Arc<watch::Sender<usize>>,
    ) {
        if let Err(e) = ctx.dead_letter(&job, &error).await {
            job.retry_count = job.retry_count.max(job.max_retries) + 1;
            let delay_ms = compute_retry_backoff_ms(config.retry_base_delay_ms, job.retry_count);
            tracing::error!(
                job_id = %job.id,
                error = %e,
                delay_ms = delay_ms,
                "Dead-letter handler failed, will retry"
            );
            Self::requeue(job, delay_ms, error, tx, outstanding);
            return;
        }

        job.status = JobStatus::DeadLetter;
        job.last_error = Some(error);
        job.updated_at = Utc::now();
        tracing::error!(job_id = %job.id, "Job moved to dead letter");
        outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }

    fn requeue(
        mut job: Job,
        delay_ms: u64,
        error: String,
        tx: mpsc::Sender<Job>,
        outstanding: Arc<watch::Sender<usize>>,
    ) {
        job.status = JobStatus::Pending;
        job.last_error = Some(error);
        job.scheduled_at = Utc::now() + chrono::Duration::milliseconds(delay_ms as i64);
        job.updated_at = Utc::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if tx.send(job).await.is_err() {
                tracing::warn!("Job queue closed, dropping retry");
                outstanding.send_modify(|n| *n = n.saturating_sub(1));
            }
        });
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(
        &self,
        queue_name: &str,
        workspace_id: Option<Uuid>,
        payload: serde_json::Value,
    ) -> Result<Uuid, AppError> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            queue_name: queue_name.to_string(),
            workspace_id,
            payload,
            status: JobStatus::Pending,
            retry_count: 0,
            max_retries: self.config.max_retries,
            timeout_seconds: self.config.timeout_seconds,
            scheduled_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        let id = job.id;

        self.outstanding.send_modify(|n| *n += 1);
        if let Err(e) = self.tx.try_send(job) {
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::warn!("Job queue is full, rejecting job");
                    AppError::Queue("Job queue is full, please try again later".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    AppError::Queue("Job queue is shut down".to_string())
                }
            });
        }

        tracing::debug!(job_id = %id, queue = %queue_name, "Job enqueued");
        Ok(id)
    }
}

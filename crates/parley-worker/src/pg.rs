//! Postgres job queue: worker pool, LISTEN/NOTIFY plus polling, retry and dead-letter.
//!
//! Shutdown: [`PgJobQueue::shutdown`] signals the pool to stop claiming; it does
//! not wait for in-flight jobs. A job interrupted by process exit stays `running`
//! until the stale reaper returns it to `pending`, counting the lost run as a
//! failed attempt. A claimed job already past its budget goes straight to the
//! dead-letter hook, so a job that crashes its worker every time still ends there.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;
use uuid::Uuid;

use parley_core::models::Job;
use parley_core::AppError;
use parley_db::{JobRepository, NEW_JOB_CHANNEL};

use crate::context::JobHandlerContext;
use crate::queue::{
    compute_retry_backoff_ms, failure_action, is_unrecoverable, FailureAction, JobQueue,
    JobQueueConfig, EXHAUSTED_ERROR,
};

pub struct PgJobQueue {
    repository: JobRepository,
    config: JobQueueConfig,
    shutdown_tx: mpsc::Sender<()>,
}

impl PgJobQueue {
    /// Start a worker pool consuming `queues`.
    ///
    /// If `pool` is `Some`, workers LISTEN for new-job notifications in addition
    /// to polling every `poll_interval_ms`.
    pub fn new(
        repository: JobRepository,
        config: JobQueueConfig,
        context: Weak<dyn JobHandlerContext>,
        queues: Vec<String>,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let repo_clone = repository.clone();
        let config_clone = config.clone();

        tokio::spawn(async move {
            Self::worker_pool(repo_clone, config_clone, context, queues, shutdown_rx, pool).await;
        });

        Self {
            repository,
            config,
            shutdown_tx,
        }
    }

    /// Producer-only queue: jobs are written to the table and picked up by
    /// whichever process runs the workers.
    pub fn new_no_worker(repository: JobRepository, config: JobQueueConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        drop(shutdown_rx);
        Self {
            repository,
            config,
            shutdown_tx,
        }
    }

    async fn worker_pool(
        repository: JobRepository,
        config: JobQueueConfig,
        context: Weak<dyn JobHandlerContext>,
        queues: Vec<String>,
        mut shutdown_rx: mpsc::Receiver<()>,
        pool: Option<sqlx::PgPool>,
    ) {
        let use_listen = pool.is_some();
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            listen_notify = use_listen,
            queues = ?queues,
            "Job queue worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        if let Some(pool) = pool {
            let tx = notify_tx.clone();
            tokio::spawn(async move {
                loop {
                    match sqlx::postgres::PgListener::connect_with(&pool).await {
                        Ok(mut listener) => {
                            if let Err(e) = listener.listen(NEW_JOB_CHANNEL).await {
                                tracing::warn!(error = %e, "LISTEN failed, will retry");
                                sleep(Duration::from_secs(5)).await;
                                continue;
                            }
                            while listener.recv().await.is_ok() {
                                let _ = tx.try_send(());
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "PgListener connect failed, will retry");
                            sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            });
        }

        let (reaper_shutdown_tx, mut reaper_shutdown_rx) = mpsc::channel::<()>(1);
        if config.stale_reap_interval_secs > 0 {
            let repo_for_reaper = repository.clone();
            let reap_interval = Duration::from_secs(config.stale_reap_interval_secs);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(reap_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = repo_for_reaper.reset_stale_running().await {
                                tracing::error!(error = %e, "Stale job reaper failed");
                            }
                        }
                        _ = reaper_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Job queue worker pool shutting down");
                    let _ = reaper_shutdown_tx.send(()).await;
                    break;
                }
                _ = notify_rx.recv() => {
                    Self::claim_and_dispatch(&repository, &config, &semaphore, &context, &queues).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch(&repository, &config, &semaphore, &context, &queues).await;
                }
            }
        }

        tracing::info!("Job queue worker pool stopped");
    }

    /// Claim jobs while workers are free and jobs are due.
    async fn claim_and_dispatch(
        repository: &JobRepository,
        config: &JobQueueConfig,
        semaphore: &Arc<Semaphore>,
        context: &Weak<dyn JobHandlerContext>,
        queues: &[String],
    ) {
        for queue_name in queues {
            loop {
                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::debug!("No workers available, skipping claim");
                        return;
                    }
                };

                match repository.claim_next(queue_name).await {
                    Ok(Some(job)) => {
                        let repo = repository.clone();
                        let config = config.clone();
                        let ctx = context.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            if let Err(e) = Self::process_job(job, repo, config, ctx).await {
                                tracing::error!(error = %e, "Job bookkeeping failed");
                            }
                        });
                    }
                    Ok(None) => {
                        tracing::trace!(queue = %queue_name, "No jobs available in queue");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, queue = %queue_name, "Failed to claim job");
                        break;
                    }
                }
            }
        }
    }

    #[tracing::instrument(skip(repository, config, context), fields(job.id = %job.id, job.queue = %job.queue_name))]
    async fn process_job(
        job: Job,
        repository: JobRepository,
        config: JobQueueConfig,
        context: Weak<dyn JobHandlerContext>,
    ) -> Result<()> {
        let ctx = context
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("JobHandlerContext was dropped, cannot process job"))?;

        if job.attempts_exhausted() {
            let error = job
                .last_error
                .clone()
                .unwrap_or_else(|| EXHAUSTED_ERROR.to_string());
            tracing::warn!(
                job_id = %job.id,
                retry_count = job.retry_count,
                max_retries = job.max_retries,
                "Claimed job is past its retry budget, dead-lettering without running it"
            );
            return Self::dead_letter(&job, &error, &repository, &config, ctx).await;
        }

        let timeout = Duration::from_secs(job.timeout_seconds.max(1) as u64);
        let result = tokio::time::timeout(timeout, ctx.clone().dispatch_job(&job)).await;

        let (error, unrecoverable) = match result {
            Ok(Ok(())) => {
                repository
                    .mark_completed(job.id)
                    .await
                    .context("Failed to mark job as completed")?;
                tracing::info!(job_id = %job.id, "Job completed successfully");
                return Ok(());
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
                repository.schedule_retry(job.id, delay_ms, &error).await?;
            }
            FailureAction::DeadLetter => {
                Self::dead_letter(&job, &error, &repository, &config, ctx).await?;
            }
        }

        Ok(())
    }

    /// Run the dead-letter hook, then mark the job. A failed hook leaves the job
    /// pending past its budget so the hook runs again after a backoff.
    async fn dead_letter(
        job: &Job,
        error: &str,
        repository: &JobRepository,
        config: &JobQueueConfig,
        ctx: Arc<dyn JobHandlerContext>,
    ) -> Result<()> {
        if let Err(e) = ctx.dead_letter(job, error).await {
            let delay_ms = compute_retry_backoff_ms(
                config.retry_base_delay_ms,
                job.retry_count.max(job.max_retries) + 1,
            );
            tracing::error!(
                job_id = %job.id,
                error = %e,
                delay_ms = delay_ms,
                "Dead-letter handler failed, will retry"
            );
            repository.defer_dead_letter(job.id, delay_ms, error).await?;
            return Ok(());
        }

        repository
            .mark_dead_letter(job.id, error)
            .await
            .context("Failed to dead-letter job")?;
        tracing::error!(job_id = %job.id, "Job moved to dead letter");
        Ok(())
    }

    /// Signals the worker pool to stop claiming new jobs. Returns immediately.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating job queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(
        &self,
        queue_name: &str,
        workspace_id: Option<Uuid>,
        payload: serde_json::Value,
    ) -> Result<Uuid, AppError> {
        let job = self
            .repository
            .enqueue(
                queue_name,
                workspace_id,
                payload,
                self.config.max_retries,
                self.config.timeout_seconds,
            )
            .await
            .map_err(|e| AppError::Queue(format!("{:#}", e)))?;

        Ok(job.id)
    }
}

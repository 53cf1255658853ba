use anyhow::{Context, Result};
use parley_core::models::Job;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

/// Channel workers LISTEN on to wake up as soon as a job is enqueued.
pub const NEW_JOB_CHANNEL: &str = "parley_new_job";

#[derive(Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a pending job and notify listening workers in the same transaction.
    #[tracing::instrument(skip(self, payload))]
    pub async fn enqueue(
        &self,
        queue_name: &str,
        workspace_id: Option<Uuid>,
        payload: serde_json::Value,
        max_retries: i32,
        timeout_seconds: i32,
    ) -> Result<Job> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for job creation")?;

        let job: Job = sqlx::query_as::<Postgres, Job>(
            r#"
            INSERT INTO jobs (id, queue_name, workspace_id, payload, max_retries, timeout_seconds)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, queue_name, workspace_id, payload, status, retry_count, max_retries,
                      timeout_seconds, scheduled_at, last_error, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(queue_name)
        .bind(workspace_id)
        .bind(payload)
        .bind(max_retries)
        .bind(timeout_seconds)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, queue = %queue_name, "Failed to insert job");
            anyhow::anyhow!("Failed to insert job: {}", e)
        })?;

        // Workers fall back to polling if the notification is lost
        if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NEW_JOB_CHANNEL)
            .bind(queue_name)
            .execute(&mut *tx)
            .await
        {
            tracing::warn!(
                error = %e,
                job_id = %job.id,
                "Failed to send pg_notify for new job, workers will discover it via polling"
            );
        }

        tx.commit()
            .await
            .context("Failed to commit job creation")?;

        tracing::info!(job_id = %job.id, queue = %queue_name, "Job enqueued");

        Ok(job)
    }

    /// Atomically claim the next due job of a queue.
    #[tracing::instrument(skip(self))]
    pub async fn claim_next(&self, queue_name: &str) -> Result<Option<Job>> {
        let job: Option<Job> = sqlx::query_as::<Postgres, Job>(
            r#"
            UPDATE jobs
            SET status = 'running',
                updated_at = NOW()
            WHERE id = (
                SELECT id
                FROM jobs
                WHERE queue_name = $1
                    AND status = 'pending'
                    AND scheduled_at <= NOW()
                ORDER BY scheduled_at ASC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, queue_name, workspace_id, payload, status, retry_count, max_retries,
                      timeout_seconds, scheduled_at, last_error, created_at, updated_at
            "#,
        )
        .bind(queue_name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to claim next job")?;

        if let Some(ref job) = job {
            tracing::debug!(job_id = %job.id, retry_count = job.retry_count, "Job claimed");
        }

        Ok(job)
    }

    pub async fn mark_completed(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', last_error = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .context("Failed to mark job as completed")?;

        Ok(())
    }

    /// Put a failed job back to pending after `delay_ms`, bumping its retry count.
    pub async fn schedule_retry(&self, job_id: Uuid, delay_ms: u64, error: &str) -> Result<Job> {
        let job: Job = sqlx::query_as::<Postgres, Job>(
            r#"
            UPDATE jobs
            SET status = 'pending',
                retry_count = retry_count + 1,
                last_error = $3,
                scheduled_at = NOW() + ($2 * interval '1 millisecond'),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, queue_name, workspace_id, payload, status, retry_count, max_retries,
                      timeout_seconds, scheduled_at, last_error, created_at, updated_at
            "#,
        )
        .bind(job_id)
        .bind(delay_ms as i64)
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .context("Failed to schedule job retry")?;

        tracing::info!(
            job_id = %job_id,
            retry_count = job.retry_count,
            max_retries = job.max_retries,
            delay_ms = delay_ms,
            "Job retry scheduled"
        );

        Ok(job)
    }

    pub async fn mark_dead_letter(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'dead_letter', last_error = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to dead-letter job")?;

        Ok(())
    }

    /// The dead-letter hook failed: park the job as pending past its retry budget
    /// so the next claim runs only the hook again, after `delay_ms`.
    pub async fn defer_dead_letter(&self, job_id: Uuid, delay_ms: u64, error: &str) -> Result<Job> {
        let job: Job = sqlx::query_as::<Postgres, Job>(
            r#"
            UPDATE jobs
            SET status = 'pending',
                retry_count = GREATEST(retry_count, max_retries) + 1,
                last_error = $3,
                scheduled_at = NOW() + ($2 * interval '1 millisecond'),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, queue_name, workspace_id, payload, status, retry_count, max_retries,
                      timeout_seconds, scheduled_at, last_error, created_at, updated_at
            "#,
        )
        .bind(job_id)
        .bind(delay_ms as i64)
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .context("Failed to defer dead-letter")?;

        tracing::warn!(job_id = %job_id, delay_ms = delay_ms, "Dead-letter deferred");

        Ok(job)
    }

    /// Return running jobs whose worker vanished (twice the job timeout without an
    /// update) to pending. Returns the number of jobs reset.
    ///
    /// The lost run counts as a failed attempt. A job reset past its retry budget
    /// is dead-lettered by the next worker that claims it instead of being run.
    pub async fn reset_stale_running(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                retry_count = retry_count + 1,
                last_error = 'worker lost while running',
                updated_at = NOW()
            WHERE status = 'running'
                AND updated_at < NOW() - (timeout_seconds * 2 * interval '1 second')
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to reset stale running jobs")?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::warn!(count = count, "Reset stale running jobs");
        }

        Ok(count)
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let job = sqlx::query_as::<Postgres, Job>(
            r#"
            SELECT id, queue_name, workspace_id, payload, status, retry_count, max_retries,
                   timeout_seconds, scheduled_at, last_error, created_at, updated_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch job")?;

        Ok(job)
    }
}

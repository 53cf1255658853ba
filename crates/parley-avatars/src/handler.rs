//! Job handler wiring the avatar service to the worker queue.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use parley_core::models::{Job, ProcessAvatarJob, AVATAR_PROCESSING_QUEUE};
use parley_core::{AppError, ErrorMetadata, LogLevel, TaskError};
use parley_worker::JobHandlerContext;

use crate::service::AvatarService;

pub struct AvatarJobHandler {
    service: Arc<AvatarService>,
}

impl AvatarJobHandler {
    pub fn new(service: Arc<AvatarService>) -> Self {
        Self { service }
    }

    fn parse_payload(job: &Job) -> Result<ProcessAvatarJob, TaskError> {
        job.payload_as::<ProcessAvatarJob>()
            .context("Failed to parse avatar job payload")
            .map_err(TaskError::unrecoverable)
    }
}

#[async_trait]
impl JobHandlerContext for AvatarJobHandler {
    #[tracing::instrument(skip(self, job), fields(job.id = %job.id, upload_id = tracing::field::Empty))]
    async fn dispatch_job(self: Arc<Self>, job: &Job) -> Result<()> {
        if job.queue_name != AVATAR_PROCESSING_QUEUE {
            return Err(TaskError::unrecoverable(anyhow::anyhow!(
                "No handler registered for queue {}",
                job.queue_name
            ))
            .into());
        }

        let payload = Self::parse_payload(job)?;
        tracing::Span::current().record("upload_id", payload.upload_id.to_string());

        match self.service.process_upload(payload.upload_id).await {
            Ok(outcome) => {
                tracing::debug!(upload_id = %payload.upload_id, outcome = ?outcome, "Avatar job finished");
                Ok(())
            }
            Err(AppError::NotFound(message)) => {
                tracing::info!(
                    upload_id = %payload.upload_id,
                    reason = %message,
                    "Avatar job target vanished, nothing to do"
                );
                Ok(())
            }
            Err(e) => {
                match e.log_level() {
                    LogLevel::Error => tracing::error!(
                        upload_id = %payload.upload_id,
                        error = %e,
                        error_code = e.error_code(),
                        recoverable = e.is_recoverable(),
                        "Avatar processing failed"
                    ),
                    _ => tracing::warn!(
                        upload_id = %payload.upload_id,
                        error = %e,
                        error_code = e.error_code(),
                        recoverable = e.is_recoverable(),
                        "Avatar processing failed"
                    ),
                }
                Err(TaskError::from_app_error(e).into())
            }
        }
    }

    async fn dead_letter(self: Arc<Self>, job: &Job, error: &str) -> Result<()> {
        let payload = Self::parse_payload(job)?;
        self.service
            .handle_dead_letter(&payload, error)
            .await
            .context("Failed to drop dead-lettered avatar upload")?;
        Ok(())
    }
}

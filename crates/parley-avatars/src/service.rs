//! Avatar upload orchestration
//!
//! An upload goes through three phases that never share a transaction:
//!
//! 1. intake stores the raw bytes, records a ledger row and enqueues a job;
//! 2. the worker downloads, transcodes and uploads every variant;
//! 3. the commit swaps the member's avatar only if the upload is still the
//!    member's latest, then spawns best-effort cleanup of unreferenced objects.
//!
//! Completion order does not matter: the winner is re-derived from the ledger
//! inside the commit transaction.

use bytes::Bytes;
use futures::future::try_join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use parley_core::avatar::{
    file_name, is_servable_filename, raw_object_key, served_object_key, variant_key,
    variant_keys, RAW_CONTENT_TYPE, VARIANT_CONTENT_TYPE,
};
use parley_core::models::{
    AvatarUpload, Member, NewAvatarUpload, ProcessAvatarJob, AVATAR_PROCESSING_QUEUE,
};
use parley_core::{AppError, AvatarKeyClock, AvatarPipelineConfig, AVATAR_SIZES};
use parley_db::{AvatarStore, CommitOutcome};
use parley_processing::{AvatarTranscoder, AvatarValidator};
use parley_storage::{ByteStream, Storage};
use parley_worker::JobQueue;

/// How a processing job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The upload became the member's avatar.
    Committed { avatar_url: String },
    /// A newer upload or a removal won; this job's variants are discarded.
    Superseded,
    /// The ledger row was already gone.
    Skipped,
}

pub struct AvatarService {
    store: Arc<dyn AvatarStore>,
    storage: Arc<dyn Storage>,
    queue: Arc<dyn JobQueue>,
    transcoder: AvatarTranscoder,
    validator: AvatarValidator,
    key_clock: AvatarKeyClock,
    cleanup: TaskTracker,
}

impl AvatarService {
    pub fn new(
        store: Arc<dyn AvatarStore>,
        storage: Arc<dyn Storage>,
        queue: Arc<dyn JobQueue>,
        config: &AvatarPipelineConfig,
    ) -> Self {
        Self {
            store,
            storage,
            queue,
            transcoder: AvatarTranscoder::new(config.webp_quality),
            validator: AvatarValidator::new(config.max_upload_bytes),
            key_clock: AvatarKeyClock::new(),
            cleanup: TaskTracker::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn AvatarStore> {
        &self.store
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Accept a raw avatar for a member and queue it for processing.
    ///
    /// The member's avatar is not touched here. If the ledger insert fails the
    /// raw object is deleted again; an enqueue failure is returned as is and
    /// leaves the ledger row for the dead-letter path or a later removal.
    #[tracing::instrument(skip(self, data), fields(size_bytes = data.len()))]
    pub async fn submit_upload(
        &self,
        workspace_id: Uuid,
        member_id: Uuid,
        data: Bytes,
    ) -> Result<AvatarUpload, AppError> {
        let format = self.validator.validate(&data)?;

        let member = self
            .store
            .get_member(workspace_id, member_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Member {} not found", member_id)))?;

        let raw_key = raw_object_key(workspace_id, member_id, self.key_clock.next_timestamp());
        self.storage.put(&raw_key, data, RAW_CONTENT_TYPE).await?;

        let new_upload = NewAvatarUpload {
            workspace_id,
            member_id,
            raw_object_key: raw_key.clone(),
            replaces_avatar_url: member.avatar_url,
        };
        let upload = match self.store.insert_upload(new_upload).await {
            Ok(upload) => upload,
            Err(e) => {
                if let Err(delete_err) = self.storage.delete(&raw_key).await {
                    tracing::warn!(
                        key = %raw_key,
                        error = %delete_err,
                        "Failed to delete raw avatar after ledger insert failure"
                    );
                }
                return Err(e);
            }
        };

        let payload = serde_json::to_value(ProcessAvatarJob {
            upload_id: upload.id,
            workspace_id,
        })
        .map_err(|e| AppError::Internal(format!("Failed to serialize avatar job: {}", e)))?;
        let job_id = self
            .queue
            .enqueue(AVATAR_PROCESSING_QUEUE, Some(workspace_id), payload)
            .await?;

        tracing::info!(
            upload_id = %upload.id,
            member_id = %member_id,
            job_id = %job_id,
            format = ?format,
            key = %raw_key,
            "Avatar upload accepted"
        );

        Ok(upload)
    }

    /// Process one ledger row: transcode, upload the variants and commit if the
    /// upload is still the member's latest.
    ///
    /// Safe under duplicate and concurrent delivery of the same job.
    #[tracing::instrument(skip(self))]
    pub async fn process_upload(&self, upload_id: Uuid) -> Result<ProcessOutcome, AppError> {
        let start = Instant::now();

        let Some(upload) = self.store.get_upload(upload_id).await? else {
            tracing::info!(upload_id = %upload_id, "Avatar upload no longer pending, skipping");
            return Ok(ProcessOutcome::Skipped);
        };

        let base_path = upload
            .base_path()
            .ok_or_else(|| {
                AppError::Configuration(format!(
                    "Raw avatar key {} has no base path",
                    upload.raw_object_key
                ))
            })?
            .to_string();
        let targets = variant_targets(&base_path)?;

        let raw = match self.storage.get(&upload.raw_object_key).await {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => {
                // A concurrent delivery or a removal may have finished first
                if self.store.get_upload(upload_id).await?.is_none() {
                    tracing::info!(
                        upload_id = %upload_id,
                        "Raw avatar already consumed, skipping"
                    );
                    return Ok(ProcessOutcome::Skipped);
                }
                return Err(AppError::Storage(format!(
                    "Raw avatar {} is missing",
                    upload.raw_object_key
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let variants = self.transcoder.transcode(raw).await?;

        try_join_all(variants.into_iter().map(|variant| {
            let storage = self.storage.clone();
            let key = variant_key(&base_path, variant.size);
            async move { storage.put(&key, variant.data, VARIANT_CONTENT_TYPE).await }
        }))
        .await?;

        let outcome = self.store.commit_if_latest(&upload, &base_path).await?;

        match outcome {
            CommitOutcome::Committed {
                displaced_avatar_url,
                ..
            } => {
                let stale: BTreeSet<String> = [upload.replaces_avatar_url.clone(), displaced_avatar_url]
                    .into_iter()
                    .flatten()
                    .filter(|url| url != &base_path)
                    .collect();

                let mut keys = vec![upload.raw_object_key.clone()];
                keys.extend(stale.iter().flat_map(|url| variant_keys(url)));
                self.spawn_cleanup(upload.member_id, keys);

                tracing::info!(
                    upload_id = %upload_id,
                    member_id = %upload.member_id,
                    avatar_url = %base_path,
                    replaced = stale.len(),
                    duration_ms = start.elapsed().as_millis(),
                    "Avatar committed"
                );
                Ok(ProcessOutcome::Committed {
                    avatar_url: base_path,
                })
            }
            CommitOutcome::Superseded { current_avatar_url } => {
                let mut keys = vec![upload.raw_object_key.clone()];
                // A duplicate delivery must not delete the variants it already committed
                if current_avatar_url.as_deref() != Some(base_path.as_str()) {
                    keys.extend(targets);
                }
                self.spawn_cleanup(upload.member_id, keys);

                tracing::info!(
                    upload_id = %upload_id,
                    member_id = %upload.member_id,
                    duration_ms = start.elapsed().as_millis(),
                    "Avatar upload superseded, discarding variants"
                );
                Ok(ProcessOutcome::Superseded)
            }
        }
    }

    /// Clear the member's avatar and cancel every in-flight upload.
    #[tracing::instrument(skip(self))]
    pub async fn remove_avatar(
        &self,
        workspace_id: Uuid,
        member_id: Uuid,
    ) -> Result<Member, AppError> {
        let removal = self.store.clear_avatar(workspace_id, member_id).await?;

        let mut keys = removal
            .previous_avatar_url
            .as_deref()
            .map(variant_keys)
            .unwrap_or_default();
        keys.extend(
            removal
                .purged_uploads
                .iter()
                .map(|upload| upload.raw_object_key.clone()),
        );
        self.spawn_cleanup(member_id, keys);

        tracing::info!(
            member_id = %member_id,
            had_avatar = removal.previous_avatar_url.is_some(),
            purged_uploads = removal.purged_uploads.len(),
            "Avatar removed"
        );

        Ok(removal.member)
    }

    /// Terminal failure: forget the upload but keep its raw object for inspection.
    #[tracing::instrument(skip(self, job), fields(upload_id = %job.upload_id))]
    pub async fn handle_dead_letter(
        &self,
        job: &ProcessAvatarJob,
        error: &str,
    ) -> Result<(), AppError> {
        let deleted = self.store.delete_upload(job.upload_id).await?;

        tracing::error!(
            upload_id = %job.upload_id,
            workspace_id = %job.workspace_id,
            ledger_row_deleted = deleted,
            error = %error,
            "Avatar processing failed permanently"
        );

        Ok(())
    }

    /// Stream a processed variant, e.g. `1699000000000.64.webp`.
    ///
    /// Returns `Ok(None)` when no such object exists.
    pub async fn open_variant(
        &self,
        workspace_id: Uuid,
        member_id: Uuid,
        filename: &str,
    ) -> Result<Option<ByteStream>, AppError> {
        if !is_servable_filename(filename) {
            return Err(AppError::InvalidInput(format!(
                "Invalid avatar file name: {}",
                filename
            )));
        }

        let key = served_object_key(workspace_id, member_id, filename);
        Ok(self.storage.get_stream(&key).await?)
    }

    /// Wait until every spawned cleanup task finished.
    pub async fn wait_for_cleanup(&self) {
        self.cleanup.close();
        self.cleanup.wait().await;
        self.cleanup.reopen();
    }

    fn spawn_cleanup(&self, member_id: Uuid, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }

        let storage = self.storage.clone();
        self.cleanup.spawn(async move {
            for key in keys {
                if let Err(e) = storage.delete(&key).await {
                    tracing::warn!(
                        member_id = %member_id,
                        key = %key,
                        error = %e,
                        "Avatar cleanup delete failed"
                    );
                }
            }
        });
    }
}

/// Variant keys for `base_path`, each checked against the serving pattern.
fn variant_targets(base_path: &str) -> Result<Vec<String>, AppError> {
    AVATAR_SIZES
        .iter()
        .map(|size| {
            let key = variant_key(base_path, *size);
            if is_servable_filename(file_name(&key)) {
                Ok(key)
            } else {
                Err(AppError::Configuration(format!(
                    "Generated avatar file name {} does not match the serving pattern",
                    file_name(&key)
                )))
            }
        })
        .collect()
}

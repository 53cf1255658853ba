//! Shared fixtures for the pipeline tests: in-memory backends plus wrappers that
//! inject failures.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageFormat, Rgb, RgbImage};
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use parley_avatars::AvatarService;
use parley_core::models::{AvatarUpload, Member, NewAvatarUpload, ProcessAvatarJob};
use parley_core::{AppError, AvatarPipelineConfig, StorageBackend};
use parley_db::{AvatarRemoval, AvatarStore, CommitOutcome, MemoryAvatarStore};
use parley_storage::{ByteStream, MemoryStorage, Storage, StorageError, StorageResult};
use parley_worker::JobQueue;

pub fn png_bytes(width: u32, height: u32) -> Bytes {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    Bytes::from(buf.into_inner())
}

pub fn test_config() -> AvatarPipelineConfig {
    AvatarPipelineConfig {
        storage_backend: StorageBackend::Memory,
        max_upload_bytes: 1024 * 1024,
        ..Default::default()
    }
}

/// Job queue that only records what was enqueued.
#[derive(Default)]
pub struct RecordingJobQueue {
    jobs: Mutex<Vec<(String, ProcessAvatarJob)>>,
    fail: AtomicBool,
}

impl RecordingJobQueue {
    pub fn fail_enqueue(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn jobs(&self) -> Vec<(String, ProcessAvatarJob)> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for RecordingJobQueue {
    async fn enqueue(
        &self,
        queue_name: &str,
        _workspace_id: Option<Uuid>,
        payload: serde_json::Value,
    ) -> Result<Uuid, AppError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Queue("queue unavailable".to_string()));
        }
        let job: ProcessAvatarJob = serde_json::from_value(payload)?;
        self.jobs
            .lock()
            .unwrap()
            .push((queue_name.to_string(), job));
        Ok(Uuid::new_v4())
    }
}

/// [`MemoryAvatarStore`] whose ledger insert can be made to fail.
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: MemoryAvatarStore,
    fail_insert: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn fail_insert(&self, fail: bool) {
        self.fail_insert.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AvatarStore for FlakyStore {
    async fn get_member(
        &self,
        workspace_id: Uuid,
        member_id: Uuid,
    ) -> Result<Option<Member>, AppError> {
        self.inner.get_member(workspace_id, member_id).await
    }

    async fn insert_upload(&self, upload: NewAvatarUpload) -> Result<AvatarUpload, AppError> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(AppError::Internal("ledger unavailable".to_string()));
        }
        self.inner.insert_upload(upload).await
    }

    async fn get_upload(&self, upload_id: Uuid) -> Result<Option<AvatarUpload>, AppError> {
        self.inner.get_upload(upload_id).await
    }

    async fn latest_upload_for_member(
        &self,
        member_id: Uuid,
    ) -> Result<Option<AvatarUpload>, AppError> {
        self.inner.latest_upload_for_member(member_id).await
    }

    async fn delete_upload(&self, upload_id: Uuid) -> Result<bool, AppError> {
        self.inner.delete_upload(upload_id).await
    }

    async fn commit_if_latest(
        &self,
        upload: &AvatarUpload,
        avatar_url: &str,
    ) -> Result<CommitOutcome, AppError> {
        self.inner.commit_if_latest(upload, avatar_url).await
    }

    async fn clear_avatar(
        &self,
        workspace_id: Uuid,
        member_id: Uuid,
    ) -> Result<AvatarRemoval, AppError> {
        self.inner.clear_avatar(workspace_id, member_id).await
    }
}

/// [`MemoryStorage`] that fails puts whose key ends with a registered suffix, and
/// optionally every delete.
#[derive(Default)]
pub struct FlakyStorage {
    pub inner: MemoryStorage,
    failing_suffixes: Mutex<HashSet<String>>,
    fail_deletes: AtomicBool,
    written: Mutex<Vec<String>>,
}

impl FlakyStorage {
    pub fn fail_puts_ending_with(&self, suffix: &str) {
        self.failing_suffixes
            .lock()
            .unwrap()
            .insert(suffix.to_string());
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.failing_suffixes.lock().unwrap().clear();
        self.fail_deletes(false);
    }

    /// Every key successfully written so far, in order.
    pub fn written_keys(&self) -> Vec<String> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn put(&self, storage_key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        let failing = self
            .failing_suffixes
            .lock()
            .unwrap()
            .iter()
            .any(|suffix| storage_key.ends_with(suffix.as_str()));
        if failing {
            return Err(StorageError::UploadFailed(format!(
                "injected failure for {}",
                storage_key
            )));
        }
        self.inner.put(storage_key, data, content_type).await?;
        self.written.lock().unwrap().push(storage_key.to_string());
        Ok(())
    }

    async fn get(&self, storage_key: &str) -> StorageResult<Bytes> {
        self.inner.get(storage_key).await
    }

    async fn get_stream(&self, storage_key: &str) -> StorageResult<Option<ByteStream>> {
        self.inner.get_stream(storage_key).await
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::DeleteFailed(format!(
                "injected failure for {}",
                storage_key
            )));
        }
        self.inner.delete(storage_key).await
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        self.inner.exists(storage_key).await
    }

    fn backend_type(&self) -> StorageBackend {
        self.inner.backend_type()
    }
}

pub struct Harness {
    pub store: FlakyStore,
    pub storage: Arc<FlakyStorage>,
    pub queue: Arc<RecordingJobQueue>,
    pub service: AvatarService,
    pub workspace_id: Uuid,
    pub member: Member,
}

impl Harness {
    pub fn new() -> Self {
        let store = FlakyStore::default();
        let storage = Arc::new(FlakyStorage::default());
        let queue = Arc::new(RecordingJobQueue::default());

        let workspace_id = Uuid::new_v4();
        let member = Member::new(workspace_id, "Ada");
        store.inner.add_member(member.clone()).unwrap();

        let service = AvatarService::new(
            Arc::new(store.clone()),
            storage.clone(),
            queue.clone(),
            &test_config(),
        );

        Self {
            store,
            storage,
            queue,
            service,
            workspace_id,
            member,
        }
    }

    pub async fn submit(&self) -> AvatarUpload {
        self.service
            .submit_upload(self.workspace_id, self.member.id, png_bytes(320, 200))
            .await
            .unwrap()
    }

    pub async fn current_avatar(&self) -> Option<String> {
        self.store
            .get_member(self.workspace_id, self.member.id)
            .await
            .unwrap()
            .unwrap()
            .avatar_url
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.storage.exists(key).await.unwrap()
    }

    pub async fn all_exist(&self, keys: &[String]) -> bool {
        for key in keys {
            if !self.exists(key).await {
                return false;
            }
        }
        true
    }

    pub async fn none_exist(&self, keys: &[String]) -> bool {
        for key in keys {
            if self.exists(key).await {
                return false;
            }
        }
        true
    }
}

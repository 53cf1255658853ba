//! The avatar job handler driven by the in-process job queue.

mod common;

use bytes::Bytes;
use std::sync::{Arc, Weak};
use uuid::Uuid;

use common::{png_bytes, test_config, FlakyStorage, FlakyStore};
use parley_avatars::{AvatarJobHandler, AvatarService};
use parley_core::models::{AvatarUpload, Member};
use parley_db::AvatarStore;
use parley_storage::Storage;
use parley_worker::{JobHandlerContext, JobQueueConfig, MemoryJobQueue};

struct WorkerHarness {
    store: FlakyStore,
    storage: Arc<FlakyStorage>,
    queue: Arc<MemoryJobQueue>,
    service: Arc<AvatarService>,
    // Keeps the queue's weak handler reference alive
    _handler: Arc<AvatarJobHandler>,
    workspace_id: Uuid,
    member: Member,
}

impl WorkerHarness {
    fn new() -> Self {
        let store = FlakyStore::default();
        let storage = Arc::new(FlakyStorage::default());
        let workspace_id = Uuid::new_v4();
        let member = Member::new(workspace_id, "Grace");
        store.inner.add_member(member.clone()).unwrap();

        let queue_config = JobQueueConfig {
            max_workers: 2,
            max_retries: 2,
            retry_base_delay_ms: 1,
            timeout_seconds: 30,
            ..Default::default()
        };

        let mut queue_slot = None;
        let mut service_slot = None;
        let handler = Arc::new_cyclic(|weak: &Weak<AvatarJobHandler>| {
            let ctx: Weak<dyn JobHandlerContext> = weak.clone();
            let queue = Arc::new(MemoryJobQueue::new(queue_config, ctx));
            let service = Arc::new(AvatarService::new(
                Arc::new(store.clone()),
                storage.clone(),
                queue.clone(),
                &test_config(),
            ));
            queue_slot = Some(queue);
            service_slot = Some(service.clone());
            AvatarJobHandler::new(service)
        });

        Self {
            store,
            storage,
            queue: queue_slot.unwrap(),
            service: service_slot.unwrap(),
            _handler: handler,
            workspace_id,
            member,
        }
    }

    async fn submit(&self, data: Bytes) -> AvatarUpload {
        self.service
            .submit_upload(self.workspace_id, self.member.id, data)
            .await
            .unwrap()
    }

    async fn settle(&self) {
        self.queue.wait_idle().await;
        self.service.wait_for_cleanup().await;
    }

    async fn current_avatar(&self) -> Option<String> {
        self.store
            .get_member(self.workspace_id, self.member.id)
            .await
            .unwrap()
            .unwrap()
            .avatar_url
    }
}

#[tokio::test]
async fn queued_upload_is_committed() {
    let h = WorkerHarness::new();

    let upload = h.submit(png_bytes(120, 90)).await;
    h.settle().await;

    assert_eq!(h.current_avatar().await.as_deref(), upload.base_path());
    assert!(h.store.get_upload(upload.id).await.unwrap().is_none());
    assert!(!h.storage.exists(&upload.raw_object_key).await.unwrap());
}

#[tokio::test]
async fn back_to_back_uploads_end_on_newest() {
    let h = WorkerHarness::new();

    let first = h.submit(png_bytes(100, 100)).await;
    let second = h.submit(png_bytes(80, 140)).await;
    h.settle().await;

    assert_eq!(h.current_avatar().await.as_deref(), second.base_path());
    for key in parley_core::avatar::variant_keys(first.base_path().unwrap()) {
        assert!(!h.storage.exists(&key).await.unwrap(), "{key}");
    }
}

#[tokio::test]
async fn exhausted_retries_dead_letter_and_keep_raw_object() {
    let h = WorkerHarness::new();
    h.storage.fail_puts_ending_with(".256.webp");

    let upload = h.submit(png_bytes(64, 64)).await;
    h.settle().await;

    assert!(h.store.get_upload(upload.id).await.unwrap().is_none());
    assert!(h.storage.exists(&upload.raw_object_key).await.unwrap());
    assert_eq!(h.current_avatar().await, None);
}

#[tokio::test]
async fn undecodable_upload_dead_letters_without_retry() {
    let h = WorkerHarness::new();

    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    data.extend_from_slice(&[7u8; 32]);
    let upload = h.submit(Bytes::from(data)).await;
    h.settle().await;

    assert!(h.store.get_upload(upload.id).await.unwrap().is_none());
    assert!(h.storage.exists(&upload.raw_object_key).await.unwrap());
    assert_eq!(h.current_avatar().await, None);
}

//! End-to-end pipeline behaviour over the in-memory backends.

mod common;

use bytes::Bytes;
use futures::StreamExt;
use uuid::Uuid;

use common::{png_bytes, Harness};
use parley_avatars::ProcessOutcome;
use parley_core::avatar::{file_name, variant_keys};
use parley_core::models::{ProcessAvatarJob, AVATAR_PROCESSING_QUEUE, MEMBER_UPDATED_EVENT};
use parley_core::AppError;
use parley_db::AvatarStore;
use parley_storage::Storage;

fn variants_of(upload: &parley_core::models::AvatarUpload) -> Vec<String> {
    variant_keys(upload.base_path().unwrap())
}

#[tokio::test]
async fn single_upload_without_prior_avatar() {
    let h = Harness::new();

    let upload = h.submit().await;
    assert_eq!(upload.replaces_avatar_url, None);
    assert!(h.exists(&upload.raw_object_key).await);
    assert_eq!(
        h.queue.jobs(),
        vec![(
            AVATAR_PROCESSING_QUEUE.to_string(),
            ProcessAvatarJob {
                upload_id: upload.id,
                workspace_id: h.workspace_id
            }
        )]
    );
    // Intake never touches the member
    assert_eq!(h.current_avatar().await, None);

    let outcome = h.service.process_upload(upload.id).await.unwrap();
    let base_path = upload.base_path().unwrap().to_string();
    assert_eq!(
        outcome,
        ProcessOutcome::Committed {
            avatar_url: base_path.clone()
        }
    );
    h.service.wait_for_cleanup().await;

    assert_eq!(h.current_avatar().await, Some(base_path));
    assert!(h.all_exist(&variants_of(&upload)).await);
    assert!(!h.exists(&upload.raw_object_key).await);
    assert!(h.store.get_upload(upload.id).await.unwrap().is_none());

    let events = h.store.inner.outbox_events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, MEMBER_UPDATED_EVENT);
    assert_eq!(
        events[0].payload["member"]["avatar_url"],
        serde_json::json!(upload.base_path().unwrap())
    );
}

#[tokio::test]
async fn sequential_uploads_replace_previous_variants() {
    let h = Harness::new();

    let a = h.submit().await;
    h.service.process_upload(a.id).await.unwrap();
    h.service.wait_for_cleanup().await;

    let b = h.submit().await;
    assert_eq!(b.replaces_avatar_url.as_deref(), a.base_path());

    let outcome = h.service.process_upload(b.id).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Committed { .. }));
    h.service.wait_for_cleanup().await;

    assert_eq!(h.current_avatar().await.as_deref(), b.base_path());
    assert!(h.none_exist(&variants_of(&a)).await);
    assert!(h.all_exist(&variants_of(&b)).await);
}

#[tokio::test]
async fn cleanup_delete_failures_do_not_undo_commit() {
    let h = Harness::new();

    let a = h.submit().await;
    h.service.process_upload(a.id).await.unwrap();
    h.service.wait_for_cleanup().await;

    h.storage.fail_deletes(true);
    let b = h.submit().await;
    let outcome = h.service.process_upload(b.id).await.unwrap();
    h.service.wait_for_cleanup().await;

    assert_eq!(
        outcome,
        ProcessOutcome::Committed {
            avatar_url: b.base_path().unwrap().to_string()
        }
    );
    assert_eq!(h.current_avatar().await.as_deref(), b.base_path());
    assert!(h.store.get_upload(b.id).await.unwrap().is_none());
    assert_eq!(h.store.inner.outbox_events().unwrap().len(), 2);

    // Leftovers stay behind as orphans
    assert!(h.exists(&b.raw_object_key).await);
    assert!(h.all_exist(&variants_of(&a)).await);
    assert!(h.all_exist(&variants_of(&b)).await);
}

#[tokio::test]
async fn removal_succeeds_when_cleanup_deletes_fail() {
    let h = Harness::new();

    let a = h.submit().await;
    h.service.process_upload(a.id).await.unwrap();
    h.service.wait_for_cleanup().await;
    let pending = h.submit().await;

    h.storage.fail_deletes(true);
    let member = h
        .service
        .remove_avatar(h.workspace_id, h.member.id)
        .await
        .unwrap();
    h.service.wait_for_cleanup().await;

    assert_eq!(member.avatar_url, None);
    assert_eq!(h.current_avatar().await, None);
    assert!(h.store.get_upload(pending.id).await.unwrap().is_none());
    assert!(h.all_exist(&variants_of(&a)).await);
    assert!(h.exists(&pending.raw_object_key).await);
}

#[tokio::test]
async fn newer_upload_finishing_first_wins() {
    let h = Harness::new();

    let a = h.submit().await;
    let b = h.submit().await;

    let b_outcome = h.service.process_upload(b.id).await.unwrap();
    assert!(matches!(b_outcome, ProcessOutcome::Committed { .. }));

    let a_outcome = h.service.process_upload(a.id).await.unwrap();
    assert_eq!(a_outcome, ProcessOutcome::Superseded);
    h.service.wait_for_cleanup().await;

    assert_eq!(h.current_avatar().await.as_deref(), b.base_path());
    assert!(h.none_exist(&variants_of(&a)).await);
    assert!(h.all_exist(&variants_of(&b)).await);
    assert!(h.store.get_upload(a.id).await.unwrap().is_none());
    assert!(!h.exists(&a.raw_object_key).await);

    // Only B produced a notification
    assert_eq!(h.store.inner.outbox_events().unwrap().len(), 1);
}

#[tokio::test]
async fn older_upload_finishing_first_is_replaced() {
    let h = Harness::new();

    let a = h.submit().await;
    let b = h.submit().await;

    // A is not the latest ledger row while B is pending
    assert_eq!(
        h.service.process_upload(a.id).await.unwrap(),
        ProcessOutcome::Superseded
    );
    assert!(matches!(
        h.service.process_upload(b.id).await.unwrap(),
        ProcessOutcome::Committed { .. }
    ));
    h.service.wait_for_cleanup().await;

    assert_eq!(h.current_avatar().await.as_deref(), b.base_path());
    assert!(h.none_exist(&variants_of(&a)).await);
}

#[tokio::test]
async fn concurrent_workers_converge_on_latest_upload() {
    let h = Harness::new();

    let uploads = vec![h.submit().await, h.submit().await, h.submit().await];
    let latest = uploads.last().unwrap().clone();

    let results = futures::future::join_all(
        uploads
            .iter()
            .rev()
            .map(|upload| h.service.process_upload(upload.id)),
    )
    .await;
    h.service.wait_for_cleanup().await;

    let committed = results
        .iter()
        .filter(|r| matches!(r, Ok(ProcessOutcome::Committed { .. })))
        .count();
    assert_eq!(committed, 1);
    assert_eq!(h.current_avatar().await.as_deref(), latest.base_path());
    assert!(h.all_exist(&variants_of(&latest)).await);
    for upload in &uploads[..2] {
        assert!(h.none_exist(&variants_of(upload)).await);
    }
    assert!(h.store.inner.uploads_for_member(h.member.id).unwrap().is_empty());
}

#[tokio::test]
async fn removal_during_processing_cancels_upload() {
    let h = Harness::new();

    let first = h.submit().await;
    h.service.process_upload(first.id).await.unwrap();
    let pending = h.submit().await;

    let member = h
        .service
        .remove_avatar(h.workspace_id, h.member.id)
        .await
        .unwrap();
    assert_eq!(member.avatar_url, None);

    let outcome = h.service.process_upload(pending.id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Skipped);
    h.service.wait_for_cleanup().await;

    assert_eq!(h.current_avatar().await, None);
    assert!(h.none_exist(&variants_of(&first)).await);
    assert!(h.none_exist(&variants_of(&pending)).await);
    assert!(!h.exists(&pending.raw_object_key).await);
}

#[tokio::test]
async fn removal_after_raw_download_discards_late_commit() {
    let h = Harness::new();

    let pending = h.submit().await;
    // Removal lands between the worker's ledger read and its commit
    let removal = h
        .store
        .inner
        .clear_avatar(h.workspace_id, h.member.id)
        .await
        .unwrap();
    assert_eq!(removal.purged_uploads.len(), 1);

    let outcome = h
        .store
        .commit_if_latest(&pending, pending.base_path().unwrap())
        .await
        .unwrap();
    assert!(matches!(outcome, parley_db::CommitOutcome::Superseded { .. }));
    assert_eq!(h.current_avatar().await, None);
}

#[tokio::test]
async fn dead_letter_keeps_raw_object() {
    let h = Harness::new();
    let upload = h.submit().await;
    let job = h.queue.jobs()[0].1;

    h.service
        .handle_dead_letter(&job, "transcode crashed")
        .await
        .unwrap();

    assert!(h.store.get_upload(upload.id).await.unwrap().is_none());
    assert!(h.exists(&upload.raw_object_key).await);
    assert_eq!(h.current_avatar().await, None);

    // A late duplicate delivery is a no-op
    assert_eq!(
        h.service.process_upload(upload.id).await.unwrap(),
        ProcessOutcome::Skipped
    );
}

#[tokio::test]
async fn redelivery_after_commit_is_noop() {
    let h = Harness::new();
    let upload = h.submit().await;

    h.service.process_upload(upload.id).await.unwrap();
    h.service.wait_for_cleanup().await;

    assert_eq!(
        h.service.process_upload(upload.id).await.unwrap(),
        ProcessOutcome::Skipped
    );
    h.service.wait_for_cleanup().await;

    assert_eq!(h.current_avatar().await.as_deref(), upload.base_path());
    assert!(h.all_exist(&variants_of(&upload)).await);
    assert_eq!(h.store.inner.outbox_events().unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_duplicate_delivery_keeps_committed_variants() {
    let h = Harness::new();
    let upload = h.submit().await;

    let (first, second) = tokio::join!(
        h.service.process_upload(upload.id),
        h.service.process_upload(upload.id)
    );
    h.service.wait_for_cleanup().await;

    let outcomes = [first.unwrap(), second.unwrap()];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, ProcessOutcome::Committed { .. }))
            .count(),
        1
    );
    assert_eq!(h.current_avatar().await.as_deref(), upload.base_path());
    assert!(h.all_exist(&variants_of(&upload)).await);
}

#[tokio::test]
async fn failed_variant_upload_leaves_member_unchanged() {
    let h = Harness::new();
    let upload = h.submit().await;

    h.storage.fail_puts_ending_with(".64.webp");
    let err = h.service.process_upload(upload.id).await.unwrap_err();
    assert!(matches!(err, AppError::Storage(_)));
    assert_eq!(h.current_avatar().await, None);
    assert!(h.store.get_upload(upload.id).await.unwrap().is_some());

    // The queue retries and the second attempt succeeds
    h.storage.heal();
    assert!(matches!(
        h.service.process_upload(upload.id).await.unwrap(),
        ProcessOutcome::Committed { .. }
    ));
}

#[tokio::test]
async fn ledger_insert_failure_removes_raw_object() {
    let h = Harness::new();
    h.store.fail_insert(true);

    let err = h
        .service
        .submit_upload(h.workspace_id, h.member.id, png_bytes(64, 64))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Internal(_)));
    assert!(h.queue.jobs().is_empty());
    assert!(h.store.inner.uploads_for_member(h.member.id).unwrap().is_empty());

    let written = h.storage.written_keys();
    assert_eq!(written.len(), 1);
    assert!(written[0].ends_with(".original"));
    assert!(!h.exists(&written[0]).await);
}

#[tokio::test]
async fn enqueue_failure_is_surfaced() {
    let h = Harness::new();
    h.queue.fail_enqueue(true);

    let err = h
        .service
        .submit_upload(h.workspace_id, h.member.id, png_bytes(64, 64))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Queue(_)));
    assert_eq!(h.current_avatar().await, None);
}

#[tokio::test]
async fn intake_rejects_bad_input() {
    let h = Harness::new();

    let empty = h
        .service
        .submit_upload(h.workspace_id, h.member.id, Bytes::new())
        .await;
    assert!(matches!(empty, Err(AppError::InvalidInput(_))));

    let not_an_image = h
        .service
        .submit_upload(h.workspace_id, h.member.id, Bytes::from_static(b"hello world"))
        .await;
    assert!(matches!(not_an_image, Err(AppError::InvalidInput(_))));

    let too_large = h
        .service
        .submit_upload(
            h.workspace_id,
            h.member.id,
            Bytes::from(vec![0u8; 2 * 1024 * 1024]),
        )
        .await;
    assert!(matches!(too_large, Err(AppError::PayloadTooLarge(_))));

    let other_workspace = h
        .service
        .submit_upload(Uuid::new_v4(), h.member.id, png_bytes(32, 32))
        .await;
    assert!(matches!(other_workspace, Err(AppError::NotFound(_))));

    assert!(h.queue.jobs().is_empty());
}

#[tokio::test]
async fn undecodable_upload_is_unrecoverable() {
    let h = Harness::new();

    // PNG signature followed by garbage passes sniffing but fails decoding
    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    data.extend_from_slice(&[0u8; 64]);
    let upload = h
        .service
        .submit_upload(h.workspace_id, h.member.id, Bytes::from(data))
        .await
        .unwrap();

    let err = h.service.process_upload(upload.id).await.unwrap_err();
    assert!(matches!(err, AppError::ImageProcessing(_)));
    assert!(!parley_core::TaskError::from_app_error(err).is_recoverable());
    assert_eq!(h.current_avatar().await, None);
}

#[tokio::test]
async fn open_variant_streams_committed_avatar() {
    let h = Harness::new();
    let upload = h.submit().await;
    h.service.process_upload(upload.id).await.unwrap();

    let key = &variants_of(&upload)[1];
    let mut stream = h
        .service
        .open_variant(h.workspace_id, h.member.id, file_name(key))
        .await
        .unwrap()
        .expect("variant exists");

    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(Bytes::from(body), h.storage.get(key).await.unwrap());

    let invalid = h
        .service
        .open_variant(h.workspace_id, h.member.id, "../secret.256.webp")
        .await;
    assert!(matches!(invalid, Err(AppError::InvalidInput(_))));

    let missing = h
        .service
        .open_variant(h.workspace_id, h.member.id, "1.64.webp")
        .await
        .unwrap();
    assert!(missing.is_none());
}

//! In-memory [`AvatarStore`]
//!
//! Every operation runs under one mutex, which gives the same atomicity the
//! Postgres transactions provide. Outbox events are kept for inspection.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parley_core::models::{
    latest_upload, AvatarUpload, Member, MemberUpdatedPayload, NewAvatarUpload, OutboxEvent,
    MEMBER_UPDATED_EVENT,
};
use parley_core::AppError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::avatar_store::{AvatarRemoval, AvatarStore, CommitOutcome};

#[derive(Default)]
struct MemoryState {
    members: HashMap<Uuid, Member>,
    uploads: HashMap<Uuid, AvatarUpload>,
    outbox: Vec<OutboxEvent>,
    last_created_at: Option<DateTime<Utc>>,
}

impl MemoryState {
    /// Strictly increasing insertion clock, like `clock_timestamp()` in practice.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(next);
        next
    }

    fn publish(&mut self, member: &Member) -> Result<(), AppError> {
        let payload = MemberUpdatedPayload {
            member: member.clone(),
        }
        .to_json()?;
        self.outbox.push(OutboxEvent {
            id: Uuid::new_v4(),
            workspace_id: member.workspace_id,
            event_type: MEMBER_UPDATED_EVENT.to_string(),
            payload,
            created_at: Utc::now(),
        });
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryAvatarStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryAvatarStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("Avatar store lock poisoned".to_string()))
    }

    pub fn add_member(&self, member: Member) -> Result<(), AppError> {
        self.state()?.members.insert(member.id, member);
        Ok(())
    }

    /// Remove a member together with its ledger rows (the cascade Postgres applies).
    pub fn remove_member(&self, member_id: Uuid) -> Result<(), AppError> {
        let mut state = self.state()?;
        state.members.remove(&member_id);
        state.uploads.retain(|_, u| u.member_id != member_id);
        Ok(())
    }

    pub fn uploads_for_member(&self, member_id: Uuid) -> Result<Vec<AvatarUpload>, AppError> {
        let state = self.state()?;
        let mut uploads: Vec<AvatarUpload> = state
            .uploads
            .values()
            .filter(|u| u.member_id == member_id)
            .cloned()
            .collect();
        uploads.sort_by_key(|u| std::cmp::Reverse(u.ordering_key()));
        Ok(uploads)
    }

    pub fn outbox_events(&self) -> Result<Vec<OutboxEvent>, AppError> {
        Ok(self.state()?.outbox.clone())
    }
}

#[async_trait]
impl AvatarStore for MemoryAvatarStore {
    async fn get_member(
        &self,
        workspace_id: Uuid,
        member_id: Uuid,
    ) -> Result<Option<Member>, AppError> {
        Ok(self
            .state()?
            .members
            .get(&member_id)
            .filter(|m| m.workspace_id == workspace_id)
            .cloned())
    }

    async fn insert_upload(&self, upload: NewAvatarUpload) -> Result<AvatarUpload, AppError> {
        let mut state = self.state()?;
        // Mirrors the foreign key on avatar_uploads.member_id
        if !state.members.contains_key(&upload.member_id) {
            return Err(AppError::NotFound(format!(
                "Member {} not found",
                upload.member_id
            )));
        }

        let row = AvatarUpload {
            id: Uuid::new_v4(),
            workspace_id: upload.workspace_id,
            member_id: upload.member_id,
            raw_object_key: upload.raw_object_key,
            replaces_avatar_url: upload.replaces_avatar_url,
            created_at: state.next_created_at(),
        };
        state.uploads.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_upload(&self, upload_id: Uuid) -> Result<Option<AvatarUpload>, AppError> {
        Ok(self.state()?.uploads.get(&upload_id).cloned())
    }

    async fn latest_upload_for_member(
        &self,
        member_id: Uuid,
    ) -> Result<Option<AvatarUpload>, AppError> {
        let state = self.state()?;
        Ok(latest_upload(state.uploads.values().filter(|u| u.member_id == member_id)).cloned())
    }

    async fn delete_upload(&self, upload_id: Uuid) -> Result<bool, AppError> {
        Ok(self.state()?.uploads.remove(&upload_id).is_some())
    }

    async fn commit_if_latest(
        &self,
        upload: &AvatarUpload,
        avatar_url: &str,
    ) -> Result<CommitOutcome, AppError> {
        let mut state = self.state()?;

        let is_latest = latest_upload(
            state
                .uploads
                .values()
                .filter(|u| u.member_id == upload.member_id),
        )
        .map(|latest| latest.id == upload.id)
        .unwrap_or(false);

        let outcome = match state.members.get(&upload.member_id).cloned() {
            Some(before)
                if is_latest
                    && before.workspace_id == upload.workspace_id
                    && before
                        .committed_upload_key()
                        .map_or(true, |watermark| watermark < upload.ordering_key()) =>
            {
                let mut member = before.clone();
                member.avatar_url = Some(avatar_url.to_string());
                member.avatar_upload_created_at = Some(upload.created_at);
                member.avatar_upload_id = Some(upload.id);
                member.updated_at = Utc::now();

                state.members.insert(member.id, member.clone());
                state.publish(&member)?;

                CommitOutcome::Committed {
                    member,
                    displaced_avatar_url: before.avatar_url,
                }
            }
            before => CommitOutcome::Superseded {
                current_avatar_url: before.and_then(|m| m.avatar_url),
            },
        };

        state.uploads.remove(&upload.id);
        Ok(outcome)
    }

    async fn clear_avatar(
        &self,
        workspace_id: Uuid,
        member_id: Uuid,
    ) -> Result<AvatarRemoval, AppError> {
        let mut state = self.state()?;

        let before = state
            .members
            .get(&member_id)
            .filter(|m| m.workspace_id == workspace_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("Member not found".to_string()))?;

        let purged_ids: Vec<Uuid> = state
            .uploads
            .values()
            .filter(|u| u.member_id == member_id)
            .map(|u| u.id)
            .collect();
        let purged_uploads = purged_ids
            .iter()
            .filter_map(|id| state.uploads.remove(id))
            .collect();

        let mut member = before.clone();
        member.avatar_url = None;
        member.avatar_upload_created_at = None;
        member.avatar_upload_id = None;
        member.updated_at = Utc::now();
        state.members.insert(member_id, member.clone());
        state.publish(&member)?;

        Ok(AvatarRemoval {
            member,
            previous_avatar_url: before.avatar_url,
            purged_uploads,
        })
    }
}

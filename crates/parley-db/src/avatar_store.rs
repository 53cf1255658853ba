//! Persistence seam of the avatar pipeline
//!
//! [`AvatarStore`] groups the ledger and member operations the orchestrator
//! needs. The two multi-statement operations, [`AvatarStore::commit_if_latest`]
//! and [`AvatarStore::clear_avatar`], each run in a single transaction.

use async_trait::async_trait;
use parley_core::models::{
    AvatarUpload, Member, MemberUpdatedPayload, NewAvatarUpload, MEMBER_UPDATED_EVENT,
};
use parley_core::AppError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::transaction::{with_transaction, TransactionGuard};
use crate::db::{AvatarUploadRepository, MemberRepository, OutboxRepository};

/// Result of the conditional commit.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// The upload became the member's avatar.
    Committed {
        member: Member,
        /// Avatar the member had right before this commit, if any.
        displaced_avatar_url: Option<String>,
    },
    /// A newer upload (or a removal) won; the member was left untouched.
    Superseded { current_avatar_url: Option<String> },
}

/// What an avatar removal changed.
#[derive(Debug, Clone)]
pub struct AvatarRemoval {
    pub member: Member,
    pub previous_avatar_url: Option<String>,
    /// In-flight uploads invalidated by the removal.
    pub purged_uploads: Vec<AvatarUpload>,
}

#[async_trait]
pub trait AvatarStore: Send + Sync {
    async fn get_member(&self, workspace_id: Uuid, member_id: Uuid)
        -> Result<Option<Member>, AppError>;

    async fn insert_upload(&self, upload: NewAvatarUpload) -> Result<AvatarUpload, AppError>;

    async fn get_upload(&self, upload_id: Uuid) -> Result<Option<AvatarUpload>, AppError>;

    async fn latest_upload_for_member(
        &self,
        member_id: Uuid,
    ) -> Result<Option<AvatarUpload>, AppError>;

    /// Delete a ledger row; deleting a missing row succeeds and returns `false`.
    async fn delete_upload(&self, upload_id: Uuid) -> Result<bool, AppError>;

    /// In one transaction: set the member's avatar to `avatar_url` if `upload` is
    /// still their latest ledger row, emit `member.updated` on success, and delete
    /// the ledger row either way.
    async fn commit_if_latest(
        &self,
        upload: &AvatarUpload,
        avatar_url: &str,
    ) -> Result<CommitOutcome, AppError>;

    /// In one transaction: delete every ledger row of the member, clear the
    /// avatar and emit `member.updated`.
    async fn clear_avatar(
        &self,
        workspace_id: Uuid,
        member_id: Uuid,
    ) -> Result<AvatarRemoval, AppError>;
}

/// Postgres-backed [`AvatarStore`]
#[derive(Clone)]
pub struct PgAvatarStore {
    pool: PgPool,
    members: MemberRepository,
    uploads: AvatarUploadRepository,
}

impl PgAvatarStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            members: MemberRepository::new(pool.clone()),
            uploads: AvatarUploadRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn members(&self) -> &MemberRepository {
        &self.members
    }

    pub fn uploads(&self) -> &AvatarUploadRepository {
        &self.uploads
    }
}

#[async_trait]
impl AvatarStore for PgAvatarStore {
    async fn get_member(
        &self,
        workspace_id: Uuid,
        member_id: Uuid,
    ) -> Result<Option<Member>, AppError> {
        self.members.get(workspace_id, member_id).await
    }

    async fn insert_upload(&self, upload: NewAvatarUpload) -> Result<AvatarUpload, AppError> {
        self.uploads.insert(upload).await
    }

    async fn get_upload(&self, upload_id: Uuid) -> Result<Option<AvatarUpload>, AppError> {
        self.uploads.get(upload_id).await
    }

    async fn latest_upload_for_member(
        &self,
        member_id: Uuid,
    ) -> Result<Option<AvatarUpload>, AppError> {
        self.uploads.latest_for_member(member_id).await
    }

    async fn delete_upload(&self, upload_id: Uuid) -> Result<bool, AppError> {
        self.uploads.delete(upload_id).await
    }

    #[tracing::instrument(skip(self, upload), fields(upload_id = %upload.id, member_id = %upload.member_id))]
    async fn commit_if_latest(
        &self,
        upload: &AvatarUpload,
        avatar_url: &str,
    ) -> Result<CommitOutcome, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        let before = MemberRepository::lock_with(&mut tx, upload.member_id).await?;
        let updated =
            MemberRepository::set_avatar_if_latest_with(&mut tx, upload, avatar_url).await?;

        let outcome = match updated {
            Some(member) => {
                let payload = MemberUpdatedPayload {
                    member: member.clone(),
                }
                .to_json()?;
                OutboxRepository::publish_with(
                    &mut tx,
                    member.workspace_id,
                    MEMBER_UPDATED_EVENT,
                    payload,
                )
                .await?;

                CommitOutcome::Committed {
                    member,
                    displaced_avatar_url: before.and_then(|m| m.avatar_url),
                }
            }
            None => CommitOutcome::Superseded {
                current_avatar_url: before.and_then(|m| m.avatar_url),
            },
        };

        AvatarUploadRepository::delete_with(&mut tx, upload.id).await?;
        tx.commit().await?;

        Ok(outcome)
    }

    #[tracing::instrument(skip(self))]
    async fn clear_avatar(
        &self,
        workspace_id: Uuid,
        member_id: Uuid,
    ) -> Result<AvatarRemoval, AppError> {
        with_transaction(&self.pool, |conn| {
            Box::pin(async move {
                let before = MemberRepository::lock_with(conn, member_id)
                    .await?
                    .filter(|m| m.workspace_id == workspace_id)
                    .ok_or_else(|| AppError::NotFound("Member not found".to_string()))?;

                let purged_uploads =
                    AvatarUploadRepository::delete_for_member_with(conn, member_id).await?;
                let member = MemberRepository::clear_avatar_with(conn, member_id).await?;

                let payload = MemberUpdatedPayload {
                    member: member.clone(),
                }
                .to_json()?;
                OutboxRepository::publish_with(conn, workspace_id, MEMBER_UPDATED_EVENT, payload)
                    .await?;

                Ok(AvatarRemoval {
                    member,
                    previous_avatar_url: before.avatar_url,
                    purged_uploads,
                })
            })
        })
        .await
    }
}

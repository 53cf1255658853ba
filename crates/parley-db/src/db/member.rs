use parley_core::models::{AvatarUpload, Member};
use parley_core::AppError;
use sqlx::{PgConnection, PgPool, Postgres};
use uuid::Uuid;

/// Repository for members' avatar state
#[derive(Clone)]
pub struct MemberRepository {
    pool: PgPool,
}

impl MemberRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, member: &Member) -> Result<Member, AppError> {
        let row = sqlx::query_as::<Postgres, Member>(
            r#"
            INSERT INTO members (id, workspace_id, display_name, avatar_url)
            VALUES ($1, $2, $3, $4)
            RETURNING id, workspace_id, display_name, avatar_url,
                      avatar_upload_created_at, avatar_upload_id, updated_at
            "#,
        )
        .bind(member.id)
        .bind(member.workspace_id)
        .bind(&member.display_name)
        .bind(&member.avatar_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Get a member scoped to its workspace
    pub async fn get(&self, workspace_id: Uuid, member_id: Uuid) -> Result<Option<Member>, AppError> {
        let row = sqlx::query_as::<Postgres, Member>(
            r#"
            SELECT id, workspace_id, display_name, avatar_url,
                   avatar_upload_created_at, avatar_upload_id, updated_at
            FROM members
            WHERE id = $1 AND workspace_id = $2
            "#,
        )
        .bind(member_id)
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Read and row-lock a member for the rest of the transaction.
    pub async fn lock_with(
        conn: &mut PgConnection,
        member_id: Uuid,
    ) -> Result<Option<Member>, AppError> {
        let row = sqlx::query_as::<Postgres, Member>(
            r#"
            SELECT id, workspace_id, display_name, avatar_url,
                   avatar_upload_created_at, avatar_upload_id, updated_at
            FROM members
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(member_id)
        .fetch_optional(conn)
        .await?;

        Ok(row)
    }

    /// Point the member's avatar at `avatar_url`, but only while `upload` is still
    /// the member's latest ledger row and is newer than the upload that produced the
    /// current avatar. Returns the updated member, or `None` if the guard failed.
    pub async fn set_avatar_if_latest_with(
        conn: &mut PgConnection,
        upload: &AvatarUpload,
        avatar_url: &str,
    ) -> Result<Option<Member>, AppError> {
        let row = sqlx::query_as::<Postgres, Member>(
            r#"
            UPDATE members
            SET avatar_url = $1,
                avatar_upload_created_at = $4,
                avatar_upload_id = $3,
                updated_at = NOW()
            WHERE id = $2
                AND workspace_id = $5
                AND $3 = (
                    SELECT id
                    FROM avatar_uploads
                    WHERE member_id = $2
                    ORDER BY created_at DESC, id DESC
                    LIMIT 1
                )
                AND (
                    avatar_upload_created_at IS NULL
                    OR (avatar_upload_created_at, avatar_upload_id) < ($4, $3)
                )
            RETURNING id, workspace_id, display_name, avatar_url,
                      avatar_upload_created_at, avatar_upload_id, updated_at
            "#,
        )
        .bind(avatar_url)
        .bind(upload.member_id)
        .bind(upload.id)
        .bind(upload.created_at)
        .bind(upload.workspace_id)
        .fetch_optional(conn)
        .await?;

        Ok(row)
    }

    /// Clear the member's avatar and its committed-upload watermark.
    pub async fn clear_avatar_with(
        conn: &mut PgConnection,
        member_id: Uuid,
    ) -> Result<Member, AppError> {
        let row = sqlx::query_as::<Postgres, Member>(
            r#"
            UPDATE members
            SET avatar_url = NULL,
                avatar_upload_created_at = NULL,
                avatar_upload_id = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, workspace_id, display_name, avatar_url,
                      avatar_upload_created_at, avatar_upload_id, updated_at
            "#,
        )
        .bind(member_id)
        .fetch_one(conn)
        .await?;

        Ok(row)
    }
}

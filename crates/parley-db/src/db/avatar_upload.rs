use parley_core::models::{AvatarUpload, NewAvatarUpload};
use parley_core::AppError;
use sqlx::{PgConnection, PgPool, Postgres};
use uuid::Uuid;

/// Repository for the avatar upload ledger
#[derive(Clone)]
pub struct AvatarUploadRepository {
    pool: PgPool,
}

impl AvatarUploadRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record an accepted upload. `created_at` comes from the database clock.
    #[tracing::instrument(skip(self, upload), fields(member_id = %upload.member_id))]
    pub async fn insert(&self, upload: NewAvatarUpload) -> Result<AvatarUpload, AppError> {
        let row = sqlx::query_as::<Postgres, AvatarUpload>(
            r#"
            INSERT INTO avatar_uploads (
                id, workspace_id, member_id, raw_object_key, replaces_avatar_url
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, workspace_id, member_id, raw_object_key, replaces_avatar_url, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(upload.workspace_id)
        .bind(upload.member_id)
        .bind(&upload.raw_object_key)
        .bind(&upload.replaces_avatar_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                error = %e,
                member_id = %upload.member_id,
                raw_object_key = %upload.raw_object_key,
                "Failed to insert avatar upload"
            );
            AppError::Database(e)
        })?;

        tracing::debug!(upload_id = %row.id, "Avatar upload recorded");

        Ok(row)
    }

    pub async fn get(&self, upload_id: Uuid) -> Result<Option<AvatarUpload>, AppError> {
        let row = sqlx::query_as::<Postgres, AvatarUpload>(
            r#"
            SELECT id, workspace_id, member_id, raw_object_key, replaces_avatar_url, created_at
            FROM avatar_uploads
            WHERE id = $1
            "#,
        )
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// The member's latest in-flight upload by `(created_at DESC, id DESC)`.
    pub async fn latest_for_member(
        &self,
        member_id: Uuid,
    ) -> Result<Option<AvatarUpload>, AppError> {
        let row = sqlx::query_as::<Postgres, AvatarUpload>(
            r#"
            SELECT id, workspace_id, member_id, raw_object_key, replaces_avatar_url, created_at
            FROM avatar_uploads
            WHERE member_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_for_member(&self, member_id: Uuid) -> Result<Vec<AvatarUpload>, AppError> {
        let rows = sqlx::query_as::<Postgres, AvatarUpload>(
            r#"
            SELECT id, workspace_id, member_id, raw_object_key, replaces_avatar_url, created_at
            FROM avatar_uploads
            WHERE member_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(member_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Delete a ledger row. Returns whether a row was removed.
    pub async fn delete(&self, upload_id: Uuid) -> Result<bool, AppError> {
        let mut conn = self.pool.acquire().await?;
        Self::delete_with(&mut *conn, upload_id).await
    }

    pub async fn delete_with(conn: &mut PgConnection, upload_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM avatar_uploads WHERE id = $1")
            .bind(upload_id)
            .execute(conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every ledger row of a member, returning the removed rows.
    pub async fn delete_for_member_with(
        conn: &mut PgConnection,
        member_id: Uuid,
    ) -> Result<Vec<AvatarUpload>, AppError> {
        let rows = sqlx::query_as::<Postgres, AvatarUpload>(
            r#"
            DELETE FROM avatar_uploads
            WHERE member_id = $1
            RETURNING id, workspace_id, member_id, raw_object_key, replaces_avatar_url, created_at
            "#,
        )
        .bind(member_id)
        .fetch_all(conn)
        .await?;

        Ok(rows)
    }
}

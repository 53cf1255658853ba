use parley_core::models::OutboxEvent;
use parley_core::AppError;
use sqlx::{PgConnection, PgPool, Postgres};
use uuid::Uuid;

/// Repository for the transactional outbox
///
/// Rows are written in the same transaction as the change they announce; a
/// separate relay (outside this workspace) delivers them.
#[derive(Clone)]
pub struct OutboxRepository {
    pool: PgPool,
}

impl OutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn publish_with(
        conn: &mut PgConnection,
        workspace_id: Uuid,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<OutboxEvent, AppError> {
        let event = sqlx::query_as::<Postgres, OutboxEvent>(
            r#"
            INSERT INTO outbox_events (id, workspace_id, event_type, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING id, workspace_id, event_type, payload, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(workspace_id)
        .bind(event_type)
        .bind(payload)
        .fetch_one(conn)
        .await?;

        tracing::debug!(
            event_id = %event.id,
            workspace_id = %workspace_id,
            event_type = %event_type,
            "Outbox event recorded"
        );

        Ok(event)
    }

    pub async fn list_for_workspace(&self, workspace_id: Uuid) -> Result<Vec<OutboxEvent>, AppError> {
        let events = sqlx::query_as::<Postgres, OutboxEvent>(
            r#"
            SELECT id, workspace_id, event_type, payload, created_at
            FROM outbox_events
            WHERE workspace_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}

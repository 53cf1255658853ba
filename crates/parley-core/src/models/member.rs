use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A workspace member as seen by the avatar pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Member {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub display_name: String,
    /// Base path of the current processed avatar (no size/format suffix).
    pub avatar_url: Option<String>,
    /// Ordering key of the upload that produced `avatar_url`.
    #[serde(skip)]
    pub avatar_upload_created_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub avatar_upload_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl Member {
    pub fn new(workspace_id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            display_name: display_name.into(),
            avatar_url: None,
            avatar_upload_created_at: None,
            avatar_upload_id: None,
            updated_at: Utc::now(),
        }
    }

    /// `(created_at, id)` of the committed upload, if the avatar came from one.
    pub fn committed_upload_key(&self) -> Option<(DateTime<Utc>, Uuid)> {
        self.avatar_upload_created_at.zip(self.avatar_upload_id)
    }
}

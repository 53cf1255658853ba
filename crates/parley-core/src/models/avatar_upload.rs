use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::avatar::base_path_from_raw_key;

/// Ledger row for an avatar upload that has been accepted but not yet processed.
///
/// Rows are inserted at intake and deleted once processing finishes, the member
/// removes their avatar, or the job is dead-lettered. They are never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct AvatarUpload {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub member_id: Uuid,
    pub raw_object_key: String,
    pub replaces_avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AvatarUpload {
    /// Ordering key deciding which upload is "latest": greater wins, `id` breaks ties.
    pub fn ordering_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }

    pub fn base_path(&self) -> Option<&str> {
        base_path_from_raw_key(&self.raw_object_key)
    }
}

/// Fields supplied by intake when creating a ledger row.
#[derive(Debug, Clone)]
pub struct NewAvatarUpload {
    pub workspace_id: Uuid,
    pub member_id: Uuid,
    pub raw_object_key: String,
    pub replaces_avatar_url: Option<String>,
}

/// The latest upload among `uploads` by `(created_at, id)`.
pub fn latest_upload<'a, I>(uploads: I) -> Option<&'a AvatarUpload>
where
    I: IntoIterator<Item = &'a AvatarUpload>,
{
    uploads.into_iter().max_by_key(|u| u.ordering_key())
}

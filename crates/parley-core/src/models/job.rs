use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Queue carrying avatar processing jobs.
pub const AVATAR_PROCESSING_QUEUE: &str = "avatar-processing";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    DeadLetter,
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::DeadLetter => write!(f, "dead_letter"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "dead_letter" => Ok(JobStatus::DeadLetter),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// A queued unit of background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Job {
    pub id: Uuid,
    pub queue_name: String,
    pub workspace_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub timeout_seconds: i32,
    pub scheduled_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// The attempt budget is spent and only the dead-letter hook is left to run.
    ///
    /// Set when the stale reaper returns a job whose last attempt never finished,
    /// or when the dead-letter hook itself failed and has to run again.
    pub fn attempts_exhausted(&self) -> bool {
        self.retry_count > self.max_retries
    }

    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Payload of an avatar processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessAvatarJob {
    pub upload_id: Uuid,
    pub workspace_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_round_trips_through_text() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::DeadLetter,
        ] {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
        assert!("scheduled".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_payload_decoding() {
        let payload = ProcessAvatarJob {
            upload_id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
        };
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            queue_name: AVATAR_PROCESSING_QUEUE.to_string(),
            workspace_id: Some(payload.workspace_id),
            payload: serde_json::to_value(payload).unwrap(),
            status: JobStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            timeout_seconds: 60,
            scheduled_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(job.payload_as::<ProcessAvatarJob>().unwrap(), payload);
        assert!(job.can_retry());
        assert!(!job.attempts_exhausted());
    }

    #[test]
    fn test_attempt_budget() {
        let now = Utc::now();
        let mut job = Job {
            id: Uuid::new_v4(),
            queue_name: AVATAR_PROCESSING_QUEUE.to_string(),
            workspace_id: None,
            payload: serde_json::Value::Null,
            status: JobStatus::Pending,
            retry_count: 3,
            max_retries: 3,
            timeout_seconds: 60,
            scheduled_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        // Final attempt still allowed to run
        assert!(!job.can_retry());
        assert!(!job.attempts_exhausted());

        job.retry_count = 4;
        assert!(job.attempts_exhausted());
    }
}

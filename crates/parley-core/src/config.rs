//! Configuration module
//!
//! Environment-driven settings for the avatar pipeline: database pool, object
//! store backend, intake limits, encoder quality and job queue tuning.

use std::env;
use std::str::FromStr;

use crate::storage_types::StorageBackend;

const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const AVATAR_MAX_UPLOAD_MB: usize = 10;
const AVATAR_WEBP_QUALITY: f32 = 80.0;
const JOB_QUEUE_MAX_WORKERS: usize = 4;
const JOB_QUEUE_POLL_INTERVAL_MS: u64 = 1000;
const JOB_QUEUE_MAX_RETRIES: i32 = 3;
const JOB_QUEUE_TIMEOUT_SECONDS: i32 = 300;
const JOB_QUEUE_RETRY_BASE_DELAY_MS: u64 = 1000;
const JOB_QUEUE_STALE_REAP_INTERVAL_SECS: u64 = 60;

/// Output format of the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AvatarPipelineConfig {
    pub environment: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    // Storage configuration
    pub storage_backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO etc.)
    pub local_storage_path: Option<String>,
    // Avatar processing
    pub max_upload_bytes: usize,
    pub webp_quality: f32,
    // Job queue
    pub job_queue_max_workers: usize,
    pub job_queue_poll_interval_ms: u64,
    pub job_queue_max_retries: i32,
    pub job_queue_timeout_seconds: i32,
    pub job_queue_retry_base_delay_ms: u64,
    /// Interval in seconds between runs of the stale job reaper. 0 = disabled.
    pub job_queue_stale_reap_interval_secs: u64,
    pub log_format: LogFormat,
}

impl Default for AvatarPipelineConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            database_url: None,
            db_max_connections: MAX_CONNECTIONS,
            db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            storage_backend: StorageBackend::Memory,
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            local_storage_path: None,
            max_upload_bytes: AVATAR_MAX_UPLOAD_MB * 1024 * 1024,
            webp_quality: AVATAR_WEBP_QUALITY,
            job_queue_max_workers: JOB_QUEUE_MAX_WORKERS,
            job_queue_poll_interval_ms: JOB_QUEUE_POLL_INTERVAL_MS,
            job_queue_max_retries: JOB_QUEUE_MAX_RETRIES,
            job_queue_timeout_seconds: JOB_QUEUE_TIMEOUT_SECONDS,
            job_queue_retry_base_delay_ms: JOB_QUEUE_RETRY_BASE_DELAY_MS,
            job_queue_stale_reap_interval_secs: JOB_QUEUE_STALE_REAP_INTERVAL_SECS,
            log_format: LogFormat::Pretty,
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

impl AvatarPipelineConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let storage_backend = match lookup("STORAGE_BACKEND") {
            Some(value) => value.parse()?,
            None => StorageBackend::S3,
        };

        let log_format = match lookup("LOG_FORMAT") {
            Some(value) => value.parse()?,
            None => LogFormat::Pretty,
        };

        let max_upload_mb: usize = parse_or(lookup("AVATAR_MAX_UPLOAD_MB"), AVATAR_MAX_UPLOAD_MB);

        let config = Self {
            environment,
            database_url: lookup("DATABASE_URL"),
            db_max_connections: parse_or(lookup("DB_MAX_CONNECTIONS"), MAX_CONNECTIONS),
            db_timeout_seconds: parse_or(lookup("DB_TIMEOUT_SECONDS"), CONNECTION_TIMEOUT_SECS),
            storage_backend,
            s3_bucket: lookup("S3_BUCKET"),
            s3_region: lookup("S3_REGION").or_else(|| lookup("AWS_REGION")),
            s3_endpoint: lookup("S3_ENDPOINT"),
            local_storage_path: lookup("LOCAL_STORAGE_PATH"),
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            webp_quality: parse_or(lookup("AVATAR_WEBP_QUALITY"), AVATAR_WEBP_QUALITY),
            job_queue_max_workers: parse_or(lookup("JOB_QUEUE_MAX_WORKERS"), JOB_QUEUE_MAX_WORKERS),
            job_queue_poll_interval_ms: parse_or(
                lookup("JOB_QUEUE_POLL_INTERVAL_MS"),
                JOB_QUEUE_POLL_INTERVAL_MS,
            ),
            job_queue_max_retries: parse_or(lookup("JOB_QUEUE_MAX_RETRIES"), JOB_QUEUE_MAX_RETRIES),
            job_queue_timeout_seconds: parse_or(
                lookup("JOB_QUEUE_TIMEOUT_SECONDS"),
                JOB_QUEUE_TIMEOUT_SECONDS,
            ),
            job_queue_retry_base_delay_ms: parse_or(
                lookup("JOB_QUEUE_RETRY_BASE_DELAY_MS"),
                JOB_QUEUE_RETRY_BASE_DELAY_MS,
            ),
            job_queue_stale_reap_interval_secs: parse_or(
                lookup("JOB_QUEUE_STALE_REAP_INTERVAL_SECS"),
                JOB_QUEUE_STALE_REAP_INTERVAL_SECS,
            ),
            log_format,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when STORAGE_BACKEND=s3"
                    ));
                }
                if self.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when STORAGE_BACKEND=s3"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when STORAGE_BACKEND=local"
                    ));
                }
            }
            StorageBackend::Memory => {
                if self.is_production() {
                    return Err(anyhow::anyhow!(
                        "STORAGE_BACKEND=memory is not allowed in production"
                    ));
                }
            }
        }

        if self.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("AVATAR_MAX_UPLOAD_MB must be greater than 0"));
        }
        if !(1.0..=100.0).contains(&self.webp_quality) {
            return Err(anyhow::anyhow!(
                "AVATAR_WEBP_QUALITY must be between 1 and 100"
            ));
        }
        if self.job_queue_max_workers == 0 {
            return Err(anyhow::anyhow!("JOB_QUEUE_MAX_WORKERS must be greater than 0"));
        }
        if self.job_queue_max_retries < 0 {
            return Err(anyhow::anyhow!("JOB_QUEUE_MAX_RETRIES must not be negative"));
        }
        if self.job_queue_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!(
                "JOB_QUEUE_TIMEOUT_SECONDS must be greater than 0"
            ));
        }

        Ok(())
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }
}

//! Avatar processing worker
//!
//! Consumes the `avatar-processing` queue from Postgres until Ctrl-C.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;

use parley_avatars::{AvatarJobHandler, AvatarService};
use parley_core::models::AVATAR_PROCESSING_QUEUE;
use parley_core::AvatarPipelineConfig;
use parley_db::{AvatarStore, JobRepository, PgAvatarStore, MIGRATOR};
use parley_infra::{init_telemetry, shutdown_telemetry, DEFAULT_LOG_FILTER};
use parley_storage::create_storage;
use parley_worker::{JobHandlerContext, JobQueue, JobQueueConfig, PgJobQueue};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AvatarPipelineConfig::from_env()?;
    init_telemetry(config.log_format, DEFAULT_LOG_FILTER)?;

    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set")?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&database_url)
        .await
        .context("Failed to connect to database")?;

    MIGRATOR
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    let storage = create_storage(&config)
        .await
        .context("Failed to initialize storage")?;
    let store: Arc<dyn AvatarStore> = Arc::new(PgAvatarStore::new(pool.clone()));

    let queue_config = JobQueueConfig::from(&config);
    let producer: Arc<dyn JobQueue> = Arc::new(PgJobQueue::new_no_worker(
        JobRepository::new(pool.clone()),
        queue_config.clone(),
    ));

    let service = Arc::new(AvatarService::new(store, storage, producer, &config));
    let handler: Arc<dyn JobHandlerContext> = Arc::new(AvatarJobHandler::new(service.clone()));

    let consumer = PgJobQueue::new(
        JobRepository::new(pool.clone()),
        queue_config,
        Arc::downgrade(&handler),
        vec![AVATAR_PROCESSING_QUEUE.to_string()],
        Some(pool.clone()),
    );

    tracing::info!(
        environment = %config.environment,
        storage_backend = ?config.storage_backend,
        "Avatar worker running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutdown signal received");
    consumer.shutdown().await;
    service.wait_for_cleanup().await;
    drop(handler);
    pool.close().await;
    shutdown_telemetry().await;

    Ok(())
}

//! `object_store`-backed storage
//!
//! S3 (and S3-compatible providers) and the in-memory store share one
//! implementation; only the construction differs.

use crate::traits::{validate_key, ByteStream, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::path::Path;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload, Result as ObjectResult};

#[cfg(feature = "storage-s3")]
use object_store::aws::{AmazonS3, AmazonS3Builder};
#[cfg(feature = "storage-memory")]
use object_store::memory::InMemory;

/// Storage over any [`ObjectStore`] implementation
#[derive(Debug)]
pub struct ObjectStorage<S> {
    store: S,
    bucket: String,
    backend: StorageBackend,
}

#[cfg(feature = "storage-s3")]
pub type S3Storage = ObjectStorage<AmazonS3>;

#[cfg(feature = "storage-memory")]
pub type MemoryStorage = ObjectStorage<InMemory>;

#[cfg(feature = "storage-s3")]
impl ObjectStorage<AmazonS3> {
    /// Create a new S3-backed storage
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    pub async fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
    ) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket.clone());

        if let Some(ref endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(ObjectStorage {
            store,
            bucket,
            backend: StorageBackend::S3,
        })
    }
}

#[cfg(feature = "storage-memory")]
impl ObjectStorage<InMemory> {
    pub fn new() -> Self {
        ObjectStorage {
            store: InMemory::new(),
            bucket: "memory".to_string(),
            backend: StorageBackend::Memory,
        }
    }
}

#[cfg(feature = "storage-memory")]
impl Default for ObjectStorage<InMemory> {
    fn default() -> Self {
        Self::new()
    }
}

fn location(storage_key: &str) -> StorageResult<Path> {
    validate_key(storage_key)?;
    Ok(Path::from(storage_key.to_string()))
}

#[async_trait]
impl<S: ObjectStore> Storage for ObjectStorage<S> {
    async fn put(&self, storage_key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        let location = location(storage_key)?;
        let size = data.len() as u64;
        let start = std::time::Instant::now();

        let result: ObjectResult<_> = self.store.put(&location, PutPayload::from(data)).await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %storage_key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Object put failed"
            );
            StorageError::UploadFailed(e.to_string())
        })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %storage_key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object put successful"
        );

        Ok(())
    }

    async fn get(&self, storage_key: &str) -> StorageResult<Bytes> {
        let location = location(storage_key)?;
        let start = std::time::Instant::now();

        let result: ObjectResult<_> = self.store.get(&location).await;

        let result = result.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(storage_key.to_string()),
            other => {
                tracing::error!(
                    error = %other,
                    bucket = %self.bucket,
                    key = %storage_key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Object get failed"
                );
                StorageError::DownloadFailed(other.to_string())
            }
        })?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;

        tracing::info!(
            bucket = %self.bucket,
            key = %storage_key,
            size_bytes = bytes.len() as u64,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object get successful"
        );

        Ok(bytes)
    }

    async fn get_stream(&self, storage_key: &str) -> StorageResult<Option<ByteStream>> {
        let location = location(storage_key)?;

        let result: ObjectResult<_> = self.store.get(&location).await;

        let result = match result {
            Ok(result) => result,
            Err(ObjectStoreError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(StorageError::DownloadFailed(e.to_string())),
        };

        let bucket = self.bucket.clone();
        let key = storage_key.to_string();

        let stream = result.into_stream().map(move |res| {
            res.map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    "Object stream read error"
                );
                StorageError::DownloadFailed(e.to_string())
            })
        });

        Ok(Some(Box::pin(stream)))
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        let location = location(storage_key)?;
        let start = std::time::Instant::now();

        let result: ObjectResult<_> = self.store.delete(&location).await;

        match result {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %storage_key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Object delete failed"
                );
                return Err(StorageError::DeleteFailed(e.to_string()));
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %storage_key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object delete successful"
        );

        Ok(())
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        let location = location(storage_key)?;
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    fn backend_type(&self) -> StorageBackend {
        self.backend
    }
}

//! Parley Storage Library
//!
//! Object store adapter used by the avatar pipeline for raw uploads and processed
//! variants. Backends: S3 (and S3-compatible providers), local filesystem, and an
//! in-memory store for development and tests.
//!
//! Keys are produced by `parley_core::avatar`; they must not contain `..` or a
//! leading `/`.

pub mod factory;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(any(feature = "storage-s3", feature = "storage-memory"))]
pub mod object;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-memory")]
pub use object::MemoryStorage;
#[cfg(any(feature = "storage-s3", feature = "storage-memory"))]
pub use object::ObjectStorage;
#[cfg(feature = "storage-s3")]
pub use object::S3Storage;
pub use parley_core::StorageBackend;
pub use traits::{ByteStream, Storage, StorageError, StorageResult};

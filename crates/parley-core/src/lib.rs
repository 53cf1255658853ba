//! Parley Core Library
//!
//! Domain models, error types, configuration and the avatar naming policy shared
//! by every crate of the avatar pipeline.

pub mod avatar;
pub mod config;
pub mod error;
pub mod models;
pub mod storage_types;
pub mod task_error;

// Re-export commonly used types
pub use avatar::{AvatarKeyClock, AvatarSize, AVATAR_SIZES};
pub use config::{AvatarPipelineConfig, LogFormat};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use storage_types::StorageBackend;
pub use task_error::{TaskError, TaskResultExt};

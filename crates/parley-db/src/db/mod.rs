//! Database repositories
//!
//! Each repository owns one table. Methods taking a `&mut PgConnection` run inside
//! a caller-owned transaction; the rest use the pool directly.

pub mod avatar_upload;
pub mod job;
pub mod member;
pub mod outbox;
pub mod transaction;

pub use avatar_upload::AvatarUploadRepository;
pub use job::{JobRepository, NEW_JOB_CHANNEL};
pub use member::MemberRepository;
pub use outbox::OutboxRepository;

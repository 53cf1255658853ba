//! Parley database layer
//!
//! Postgres repositories for members, the avatar upload ledger, the outbox and
//! the job queue, plus the [`AvatarStore`] seam the pipeline talks to. A
//! [`MemoryAvatarStore`] with the same semantics backs tests and local runs.

pub mod avatar_store;
pub mod db;
pub mod memory;

pub use avatar_store::{AvatarRemoval, AvatarStore, CommitOutcome, PgAvatarStore};
pub use db::transaction::{with_transaction, TransactionGuard};
pub use db::{
    AvatarUploadRepository, JobRepository, MemberRepository, OutboxRepository, NEW_JOB_CHANNEL,
};
pub use memory::MemoryAvatarStore;

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

//! Parley avatars
//!
//! The avatar upload pipeline of a workspace member: [`AvatarService`] handles
//! intake, processing, the "latest upload wins" commit, removal and dead-letter
//! handling; [`AvatarJobHandler`] runs it from a job queue.

pub mod handler;
pub mod service;

pub use handler::AvatarJobHandler;
pub use service::{AvatarService, ProcessOutcome};

//! Data models for the avatar pipeline

mod avatar_upload;
mod event;
mod job;
mod member;

pub use avatar_upload::*;
pub use event::*;
pub use job::*;
pub use member::*;

//! Parley Processing Library
//!
//! Intake sniffing and avatar transcoding: every accepted image is decoded once,
//! cover-cropped to each configured square size and re-encoded as WebP.

pub mod resize;
pub mod transcoder;
pub mod validator;

pub use transcoder::{AvatarTranscoder, TranscodedVariant};
pub use validator::{sniff_image_format, AvatarValidator};

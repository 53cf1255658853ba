//! Tracing initialization
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and either a
//! compact console layer or a JSON layer.

mod init;

pub use init::{build_filter, init_telemetry, shutdown_telemetry, DEFAULT_LOG_FILTER};

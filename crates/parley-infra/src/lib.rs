//! Parley Infrastructure Library
//!
//! Shared infrastructure used by the Parley binaries. Currently telemetry
//! initialization only.

pub mod telemetry;

pub use telemetry::{init_telemetry, shutdown_telemetry, DEFAULT_LOG_FILTER};

//! # swkit Common
//!
//! Shared plumbing for the swkit offline agent crates.
//!
//! ## Features
//!
//! - Logging configuration and setup (`tracing` + `tracing-subscriber`)
//! - Wall-clock helpers used to timestamp cached entries

use std::time::{SystemTime, UNIX_EPOCH};

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LoggingError};

/// Milliseconds since the Unix epoch.
///
/// Clocks set before 1970 report zero rather than failing.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

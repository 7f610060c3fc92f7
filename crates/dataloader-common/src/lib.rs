//! Dataloader Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the dataloader workspace:
//!
//! - **Logging**: tracing subscriber setup driven by `LOG_*` environment variables
//! - **Progress**: download progress bars and human-readable byte sizes

pub mod logging;
pub mod progress;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel, LogOutput, LoggingGuard};

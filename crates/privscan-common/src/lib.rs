//! PrivScan Common - Shared utilities: logging and configuration
//!
//! This crate provides common functionality used by the PrivScan binaries.

pub mod config;
pub mod logging;

pub use config::{
    BrowserConfig, Config, ConfigBuilder, LoggingConfig, ScanConfig, MAX_INTERVAL_MINUTES,
};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogFormat};

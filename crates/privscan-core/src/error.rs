//! Run-level error types for PrivScan
//!
//! These are faults of the catalog, the runner, or the configuration. A check
//! that fails its own inspection reports a [`crate::CheckError`] instead.

use crate::outcome::ResultId;
use thiserror::Error;

/// Result type alias using PrivScan Error
pub type Result<T> = std::result::Result<T, Error>;

/// PrivScan error types
#[derive(Error, Debug)]
pub enum Error {
    // === Catalog Errors ===
    #[error("Duplicate check id {id}: already registered by {existing}")]
    DuplicateCheckId { id: ResultId, existing: String },

    #[error("Check not found: {id}")]
    CheckNotFound { id: ResultId },

    #[error("No checks selected to run")]
    EmptyCatalog,

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfig { key: String, message: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error must stop the run before any check executes
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DuplicateCheckId { .. }
                | Error::EmptyCatalog
                | Error::CheckNotFound { .. }
                | Error::Configuration(_)
                | Error::InvalidConfig { .. }
        )
    }

    /// Get an error code for logging
    pub fn code(&self) -> &'static str {
        match self {
            Error::DuplicateCheckId { .. } => "DUPLICATE_CHECK_ID",
            Error::CheckNotFound { .. } => "CHECK_NOT_FOUND",
            Error::EmptyCatalog => "EMPTY_CATALOG",
            Error::Configuration(_) => "CONFIG_ERROR",
            Error::InvalidConfig { .. } => "INVALID_CONFIG",
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_errors_are_fatal() {
        let dup = Error::DuplicateCheckId {
            id: ResultId(7),
            existing: "Telemetry level".into(),
        };
        assert!(dup.is_fatal());
        assert_eq!(dup.code(), "DUPLICATE_CHECK_ID");
        assert!(Error::EmptyCatalog.is_fatal());
        assert!(!Error::Internal("boom".into()).is_fatal());
    }
}

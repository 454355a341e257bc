//! PrivScan Core - Foundation types, capability traits, and error handling
//!
//! This crate provides the core abstractions used throughout PrivScan:
//! - `Check`: The trait every check unit implements
//! - `KeyStore`, `FileStore`, `VersionProbe`: capability interfaces over machine state
//! - `CheckOutcome`, `CheckError`: the one value a check invocation produces
//! - `Severity`, `CheckCategory`, `ResultId`: core enums and identifiers

pub mod access;
pub mod check;
pub mod error;
pub mod outcome;
pub mod severity;

// Re-export commonly used types at crate root
pub use access::{
    check_key, lookup_integer, lookup_string, AccessError, AccessErrorKind, AccessMode,
    AccessResult, AccessResultExt, CloseOutcome, FileHandle, FileInfo, FileStore, KeyHandle,
    KeyInfo, KeyStore, OsVersion, ScopedFile, ScopedKey, ValueType, VersionProbe, NOT_FOUND,
    NO_LIMIT,
};
pub use check::{Accessors, CancelFlag, Capabilities, Check, CheckContext, CheckMetadata};
pub use error::{Error, Result};
pub use outcome::{CheckError, CheckOutcome, CheckResult, ErrorKind, Payload, ResultId};
pub use severity::{CheckCategory, Severity};

//! Capability interfaces over the machine state a check may read
//!
//! Three resources are abstracted: a hierarchical key store (the Windows
//! registry), files, and the OS version. `privscan-access` provides a live
//! and a fixture implementation of each; checks only ever see these traits.
//!
//! Every successful `open` must be matched by exactly one `close`. Checks get
//! that for free by going through [`ScopedKey`] and [`ScopedFile`], which
//! close on drop and therefore on every `?` early return.

use crate::outcome::{Cause, CheckError, ErrorKind, ResultId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, warn};

/// Value returned by [`check_key`] when the key or value is absent
pub const NOT_FOUND: &str = "-1";

/// Enumeration limit meaning "everything"
pub const NO_LIMIT: usize = usize::MAX;

/// Result type for accessor calls
pub type AccessResult<T> = std::result::Result<T, AccessError>;

/// Fine-grained reason an accessor call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessErrorKind {
    NotFound,
    PermissionDenied,
    TypeMismatch,
    Malformed,
    InvalidHandle,
    Unsupported,
    CopyFailed,
    Io,
}

impl AccessErrorKind {
    /// Map onto the check error taxonomy
    pub fn classify(&self) -> ErrorKind {
        match self {
            AccessErrorKind::NotFound
            | AccessErrorKind::PermissionDenied
            | AccessErrorKind::InvalidHandle
            | AccessErrorKind::Unsupported
            | AccessErrorKind::Io => ErrorKind::ResourceUnavailable,
            AccessErrorKind::TypeMismatch | AccessErrorKind::Malformed => ErrorKind::ParseFailure,
            AccessErrorKind::CopyFailed => ErrorKind::PartialDataLoss,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessErrorKind::NotFound => "not found",
            AccessErrorKind::PermissionDenied => "permission denied",
            AccessErrorKind::TypeMismatch => "type mismatch",
            AccessErrorKind::Malformed => "malformed data",
            AccessErrorKind::InvalidHandle => "invalid handle",
            AccessErrorKind::Unsupported => "unsupported",
            AccessErrorKind::CopyFailed => "copy failed",
            AccessErrorKind::Io => "i/o error",
        }
    }
}

impl std::fmt::Display for AccessErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure of a single accessor call
#[derive(Error, Debug, Clone)]
#[error("{kind} at {path}: {message}")]
pub struct AccessError {
    kind: AccessErrorKind,
    path: String,
    message: String,
    #[source]
    cause: Option<Cause>,
}

impl AccessError {
    pub fn new(kind: AccessErrorKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn not_found(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AccessErrorKind::NotFound, path, message)
    }

    pub fn invalid_handle(path: impl Into<String>) -> Self {
        Self::new(AccessErrorKind::InvalidHandle, path, "handle is not open in this store")
    }

    /// Wrap an I/O error, keeping not-found and permission distinctions
    pub fn from_io(path: impl Into<String>, err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => AccessErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => AccessErrorKind::PermissionDenied,
            _ => AccessErrorKind::Io,
        };
        Self::new(kind, path, err.to_string()).with_cause(err)
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn kind(&self) -> AccessErrorKind {
        self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == AccessErrorKind::NotFound
    }

    /// Classify into a check error for the given check
    pub fn into_check_error(self, id: ResultId) -> CheckError {
        let kind = self.kind.classify();
        let message = self.to_string();
        let err = CheckError::new(id, kind, message);
        match self.cause {
            Some(cause) => err.with_shared_cause(cause),
            None => err,
        }
    }
}

/// Converts accessor results into check results
pub trait AccessResultExt<T> {
    fn for_check(self, id: ResultId) -> std::result::Result<T, CheckError>;
}

impl<T> AccessResultExt<T> for AccessResult<T> {
    fn for_check(self, id: ResultId) -> std::result::Result<T, CheckError> {
        self.map_err(|e| e.into_check_error(id))
    }
}

/// Requested access when opening a key or file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    Read,
    ReadWrite,
}

/// Type tag of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    ExpandString,
    MultiString,
    Dword,
    Qword,
    Binary,
}

impl ValueType {
    /// Parse a `REG_*` type name
    pub fn from_reg_name(name: &str) -> Option<Self> {
        match name {
            "REG_SZ" => Some(ValueType::String),
            "REG_EXPAND_SZ" => Some(ValueType::ExpandString),
            "REG_MULTI_SZ" => Some(ValueType::MultiString),
            "REG_DWORD" => Some(ValueType::Dword),
            "REG_QWORD" => Some(ValueType::Qword),
            "REG_BINARY" => Some(ValueType::Binary),
            _ => None,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(
            self,
            ValueType::String | ValueType::ExpandString | ValueType::MultiString
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, ValueType::Dword | ValueType::Qword)
    }
}

/// Opaque reference to an open key. Not `Clone`: one owner, one close.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct KeyHandle {
    id: u64,
    path: String,
}

impl KeyHandle {
    /// Issued by store implementations only
    pub fn new(id: u64, path: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Opaque reference to an open file. Not `Clone`: one owner, one close.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct FileHandle {
    id: u64,
    path: String,
}

impl FileHandle {
    /// Issued by store implementations only
    pub fn new(id: u64, path: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Result of closing a handle. Closing twice is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    AlreadyClosed,
}

/// Metadata of an open key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyInfo {
    pub value_count: usize,
    pub child_count: usize,
}

/// Metadata of an open file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub len: u64,
    pub read_only: bool,
    pub modified: Option<SystemTime>,
}

/// Operating system version triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OsVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl OsVersion {
    pub fn new(major: u32, minor: u32, build: u32) -> Self {
        Self {
            major,
            minor,
            build,
        }
    }
}

impl std::fmt::Display for OsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

/// Hierarchical key store (registry)
///
/// Implementations are shared read-only across concurrently running checks
/// and must tolerate interleaved calls on the same path.
pub trait KeyStore: Send + Sync {
    fn open(&self, path: &str, mode: AccessMode) -> AccessResult<KeyHandle>;

    fn read_string(&self, handle: &KeyHandle, name: &str) -> AccessResult<(String, ValueType)>;

    fn read_binary(&self, handle: &KeyHandle, name: &str) -> AccessResult<(Vec<u8>, ValueType)>;

    fn read_integer(&self, handle: &KeyHandle, name: &str) -> AccessResult<(u64, ValueType)>;

    /// Value names in store order, at most `limit`
    fn value_names(&self, handle: &KeyHandle, limit: usize) -> AccessResult<Vec<String>>;

    /// Child key names in store order, at most `limit`
    fn child_names(&self, handle: &KeyHandle, limit: usize) -> AccessResult<Vec<String>>;

    fn stat(&self, handle: &KeyHandle) -> AccessResult<KeyInfo>;

    /// Must not panic on a closed or foreign handle
    fn close(&self, handle: &KeyHandle) -> AccessResult<CloseOutcome>;
}

/// File access
pub trait FileStore: Send + Sync {
    fn open(&self, path: &str, mode: AccessMode) -> AccessResult<FileHandle>;

    /// Read the remaining contents
    fn read(&self, handle: &FileHandle) -> AccessResult<Vec<u8>>;

    fn write(&self, handle: &FileHandle, data: &[u8]) -> AccessResult<usize>;

    fn stat(&self, handle: &FileHandle) -> AccessResult<FileInfo>;

    /// Must not panic on a closed or foreign handle
    fn close(&self, handle: &FileHandle) -> AccessResult<CloseOutcome>;

    /// Entry names of a directory, sorted, at most `limit`
    fn list_dir(&self, path: &str, limit: usize) -> AccessResult<Vec<String>>;

    /// Copy a file that another process may hold open, then read the copy.
    /// A missing source is `NotFound`; any other failed copy is
    /// [`AccessErrorKind::CopyFailed`].
    fn snapshot(&self, path: &str) -> AccessResult<Vec<u8>>;
}

/// OS version probe
pub trait VersionProbe: Send + Sync {
    fn os_version(&self) -> AccessResult<OsVersion>;
}

/// Key handle that closes itself when dropped
pub struct ScopedKey<'a> {
    store: &'a dyn KeyStore,
    handle: Option<KeyHandle>,
}

impl<'a> ScopedKey<'a> {
    pub fn open(store: &'a dyn KeyStore, path: &str, mode: AccessMode) -> AccessResult<Self> {
        let handle = store.open(path, mode)?;
        Ok(Self {
            store,
            handle: Some(handle),
        })
    }

    fn handle(&self) -> AccessResult<&KeyHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| AccessError::invalid_handle("<closed>"))
    }

    pub fn path(&self) -> &str {
        self.handle.as_ref().map(|h| h.path()).unwrap_or("<closed>")
    }

    pub fn read_string(&self, name: &str) -> AccessResult<(String, ValueType)> {
        self.store.read_string(self.handle()?, name)
    }

    pub fn read_binary(&self, name: &str) -> AccessResult<(Vec<u8>, ValueType)> {
        self.store.read_binary(self.handle()?, name)
    }

    pub fn read_integer(&self, name: &str) -> AccessResult<(u64, ValueType)> {
        self.store.read_integer(self.handle()?, name)
    }

    pub fn value_names(&self, limit: usize) -> AccessResult<Vec<String>> {
        self.store.value_names(self.handle()?, limit)
    }

    pub fn child_names(&self, limit: usize) -> AccessResult<Vec<String>> {
        self.store.child_names(self.handle()?, limit)
    }

    pub fn stat(&self) -> AccessResult<KeyInfo> {
        self.store.stat(self.handle()?)
    }

    /// Close now and report the outcome
    pub fn close(mut self) -> AccessResult<CloseOutcome> {
        match self.handle.take() {
            Some(handle) => self.store.close(&handle),
            None => Ok(CloseOutcome::AlreadyClosed),
        }
    }
}

impl Drop for ScopedKey<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.store.close(&handle) {
                warn!("Failed to close key {}: {}", handle.path(), e);
            }
        }
    }
}

/// File handle that closes itself when dropped
pub struct ScopedFile<'a> {
    store: &'a dyn FileStore,
    handle: Option<FileHandle>,
}

impl<'a> ScopedFile<'a> {
    pub fn open(store: &'a dyn FileStore, path: &str, mode: AccessMode) -> AccessResult<Self> {
        let handle = store.open(path, mode)?;
        Ok(Self {
            store,
            handle: Some(handle),
        })
    }

    fn handle(&self) -> AccessResult<&FileHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| AccessError::invalid_handle("<closed>"))
    }

    pub fn read(&self) -> AccessResult<Vec<u8>> {
        self.store.read(self.handle()?)
    }

    pub fn write(&self, data: &[u8]) -> AccessResult<usize> {
        self.store.write(self.handle()?, data)
    }

    pub fn stat(&self) -> AccessResult<FileInfo> {
        self.store.stat(self.handle()?)
    }

    pub fn close(mut self) -> AccessResult<CloseOutcome> {
        match self.handle.take() {
            Some(handle) => self.store.close(&handle),
            None => Ok(CloseOutcome::AlreadyClosed),
        }
    }
}

impl Drop for ScopedFile<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.store.close(&handle) {
                warn!("Failed to close file {}: {}", handle.path(), e);
            }
        }
    }
}

/// Read a value as text, returning [`NOT_FOUND`] when the key cannot be
/// opened or the value is absent.
///
/// Integer values are rendered in decimal. A stored string `"-1"` is
/// indistinguishable from absence here; use [`lookup_string`] when that matters.
pub fn check_key(store: &dyn KeyStore, path: &str, name: &str) -> String {
    let key = match ScopedKey::open(store, path, AccessMode::Read) {
        Ok(key) => key,
        Err(e) => {
            debug!("check_key: cannot open {}: {}", path, e);
            return NOT_FOUND.to_string();
        }
    };

    match key.read_string(name) {
        Ok((value, _)) => value,
        Err(e) if e.kind() == AccessErrorKind::TypeMismatch => match key.read_integer(name) {
            Ok((value, _)) => value.to_string(),
            Err(_) => NOT_FOUND.to_string(),
        },
        Err(e) => {
            debug!("check_key: {} not readable: {}", name, e);
            NOT_FOUND.to_string()
        }
    }
}

/// Read a string value; `Ok(None)` when the key or the value does not exist
pub fn lookup_string(store: &dyn KeyStore, path: &str, name: &str) -> AccessResult<Option<String>> {
    let key = match ScopedKey::open(store, path, AccessMode::Read) {
        Ok(key) => key,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e),
    };

    match key.read_string(name) {
        Ok((value, _)) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Read an integer value; `Ok(None)` when the key or the value does not exist
pub fn lookup_integer(store: &dyn KeyStore, path: &str, name: &str) -> AccessResult<Option<u64>> {
    let key = match ScopedKey::open(store, path, AccessMode::Read) {
        Ok(key) => key,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e),
    };

    match key.read_integer(name) {
        Ok((value, _)) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_kind_classification() {
        assert_eq!(AccessErrorKind::NotFound.classify(), ErrorKind::ResourceUnavailable);
        assert_eq!(AccessErrorKind::PermissionDenied.classify(), ErrorKind::ResourceUnavailable);
        assert_eq!(AccessErrorKind::Malformed.classify(), ErrorKind::ParseFailure);
        assert_eq!(AccessErrorKind::CopyFailed.classify(), ErrorKind::PartialDataLoss);
    }

    #[test]
    fn test_for_check_keeps_path() {
        let result: AccessResult<()> = Err(AccessError::not_found(r"HKLM\SOFTWARE\Missing", "no such key"));
        let err = result.for_check(ResultId(12)).unwrap_err();
        assert_eq!(err.id(), ResultId(12));
        assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);
        assert!(err.message().contains(r"HKLM\SOFTWARE\Missing"));
    }

    #[test]
    fn test_io_error_mapping() {
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err = AccessError::from_io("/etc/shadow", denied);
        assert_eq!(err.kind(), AccessErrorKind::PermissionDenied);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_value_type_names() {
        assert_eq!(ValueType::from_reg_name("REG_DWORD"), Some(ValueType::Dword));
        assert!(ValueType::from_reg_name("REG_EXPAND_SZ").unwrap().is_string());
        assert_eq!(ValueType::from_reg_name("REG_LINK"), None);
    }

    #[test]
    fn test_os_version_ordering() {
        assert!(OsVersion::new(10, 0, 22631) > OsVersion::new(10, 0, 19045));
        assert_eq!(OsVersion::new(10, 0, 22631).to_string(), "10.0.22631");
    }
}

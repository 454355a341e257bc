//! Check trait and metadata - the interface all check units implement

use crate::access::{AccessError, AccessErrorKind, AccessResult, FileStore, KeyStore, VersionProbe};
use crate::outcome::{CheckResult, ResultId};
use crate::severity::{CheckCategory, Severity};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The trait that all check units must implement
///
/// A check is a pure computation over the accessors it is handed. It must
/// return exactly one outcome or one error, and must not keep any handle
/// open past `execute`.
pub trait Check: Send + Sync {
    /// Stable identifier for this check
    fn id(&self) -> ResultId;

    /// Get the check metadata
    fn metadata(&self) -> &CheckMetadata;

    /// Accessors this check needs
    fn capabilities(&self) -> Capabilities;

    /// Execute the check against the given context
    fn execute(&self, ctx: &CheckContext) -> CheckResult;
}

/// Metadata describing a check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckMetadata {
    /// Stable identifier
    pub id: ResultId,

    /// Human-readable name
    pub name: String,

    /// Detailed description
    #[serde(default)]
    pub description: String,

    /// Check category
    pub category: CheckCategory,

    /// Severity of a positive finding
    pub severity: Severity,

    /// Contribution to the weighted score per positive finding
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Whether this check runs when no explicit selection is made
    #[serde(default = "default_enabled")]
    pub enabled_by_default: bool,
}

fn default_weight() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

impl CheckMetadata {
    pub fn new(
        id: impl Into<ResultId>,
        name: impl Into<String>,
        category: CheckCategory,
        severity: Severity,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category,
            severity,
            weight: 1,
            enabled_by_default: true,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn disabled_by_default(mut self) -> Self {
        self.enabled_by_default = false;
        self
    }
}

/// Set of accessor capabilities a check declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub keys: bool,
    pub files: bool,
    pub version: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        keys: false,
        files: false,
        version: false,
    };
    pub const KEYS: Capabilities = Capabilities {
        keys: true,
        files: false,
        version: false,
    };
    pub const FILES: Capabilities = Capabilities {
        keys: false,
        files: true,
        version: false,
    };
    pub const VERSION: Capabilities = Capabilities {
        keys: false,
        files: false,
        version: true,
    };

    /// Names of capabilities in `self` that `available` lacks
    pub fn missing_from(&self, available: Capabilities) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.keys && !available.keys {
            missing.push("keys");
        }
        if self.files && !available.files {
            missing.push("files");
        }
        if self.version && !available.version {
            missing.push("version");
        }
        missing
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Self) -> Self::Output {
        Capabilities {
            keys: self.keys || rhs.keys,
            files: self.files || rhs.files,
            version: self.version || rhs.version,
        }
    }
}

/// The accessor bundle for a run: all live or all fixture, chosen once
#[derive(Clone, Default)]
pub struct Accessors {
    keys: Option<Arc<dyn KeyStore>>,
    files: Option<Arc<dyn FileStore>>,
    version: Option<Arc<dyn VersionProbe>>,
}

impl std::fmt::Debug for Accessors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessors")
            .field("keys", &self.keys.as_ref().map(|_| "..."))
            .field("files", &self.files.as_ref().map(|_| "..."))
            .field("version", &self.version.as_ref().map(|_| "..."))
            .finish()
    }
}

impl Accessors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys(mut self, keys: Arc<dyn KeyStore>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn with_files(mut self, files: Arc<dyn FileStore>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn with_version(mut self, version: Arc<dyn VersionProbe>) -> Self {
        self.version = Some(version);
        self
    }

    /// Capabilities this bundle provides
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            keys: self.keys.is_some(),
            files: self.files.is_some(),
            version: self.version.is_some(),
        }
    }

    pub fn keys(&self) -> AccessResult<&dyn KeyStore> {
        self.keys
            .as_deref()
            .ok_or_else(|| unsupported("key store"))
    }

    pub fn files(&self) -> AccessResult<&dyn FileStore> {
        self.files
            .as_deref()
            .ok_or_else(|| unsupported("file store"))
    }

    pub fn version(&self) -> AccessResult<&dyn VersionProbe> {
        self.version
            .as_deref()
            .ok_or_else(|| unsupported("version probe"))
    }
}

fn unsupported(what: &str) -> AccessError {
    AccessError::new(
        AccessErrorKind::Unsupported,
        what,
        "accessor not provided for this run",
    )
}

/// Shared cancellation flag. Checks poll it; nothing is preempted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// Context passed to checks during execution
#[derive(Debug, Clone)]
pub struct CheckContext {
    /// Accessors for this run
    pub accessors: Accessors,

    /// Set when this check's deadline passes
    pub deadline: CancelFlag,

    /// Set when the whole run is cancelled
    pub run: CancelFlag,
}

impl CheckContext {
    pub fn new(accessors: Accessors) -> Self {
        Self {
            accessors,
            deadline: CancelFlag::new(),
            run: CancelFlag::new(),
        }
    }

    pub fn with_run_flag(mut self, run: CancelFlag) -> Self {
        self.run = run;
        self
    }

    /// Long checks should poll this between steps
    pub fn is_cancelled(&self) -> bool {
        self.deadline.is_cancelled() || self.run.is_cancelled()
    }

    pub fn keys(&self) -> AccessResult<&dyn KeyStore> {
        self.accessors.keys()
    }

    pub fn files(&self) -> AccessResult<&dyn FileStore> {
        self.accessors.files()
    }

    pub fn version(&self) -> AccessResult<&dyn VersionProbe> {
        self.accessors.version()
    }
}

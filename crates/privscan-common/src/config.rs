//! Configuration management for PrivScan
//!
//! Nothing here is read from a global. The binary loads a [`Config`] once and
//! hands the relevant pieces to the runner, the aggregator, and the catalog.

use privscan_core::{Error, ResultId, Result, Severity};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Runner and report settings
    #[serde(default)]
    pub scan: ScanConfig,

    /// Browser profile locations
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Create a configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Merge with environment variables (PRIVSCAN_ prefix)
    pub fn merge_env(self) -> Result<Self> {
        self.merge_vars(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source. Unparseable numbers are an
    /// error rather than silently ignored.
    pub fn merge_vars<F>(mut self, var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Scan settings
        if let Some(val) = var("PRIVSCAN_CONCURRENCY_LIMIT") {
            self.scan.concurrency_limit = parse_var("PRIVSCAN_CONCURRENCY_LIMIT", &val)?;
        }
        if let Some(val) = var("PRIVSCAN_CHECK_TIMEOUT_MS") {
            self.scan.per_check_timeout_ms = parse_var("PRIVSCAN_CHECK_TIMEOUT_MS", &val)?;
        }
        if let Some(val) = var("PRIVSCAN_UNEVALUATED_SEVERITY") {
            self.scan.unevaluated_severity = val.parse().map_err(|message| Error::InvalidConfig {
                key: "PRIVSCAN_UNEVALUATED_SEVERITY".to_string(),
                message,
            })?;
        }
        if let Some(val) = var("PRIVSCAN_INTERVAL_MINUTES") {
            self.scan.interval_minutes = parse_var("PRIVSCAN_INTERVAL_MINUTES", &val)?;
        }

        // Browser settings
        if let Some(val) = var("PRIVSCAN_PROFILE_ROOTS") {
            self.browser.profile_roots = std::env::split_paths(&val)
                .map(|p| p.to_string_lossy().to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }

        // Logging
        if let Some(val) = var("PRIVSCAN_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = var("PRIVSCAN_LOG_FORMAT") {
            self.logging.format = val;
        }

        Ok(self)
    }

    /// Reject values the runner cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.scan.concurrency_limit == 0 {
            return Err(invalid("scan.concurrency_limit", "must be at least 1"));
        }
        if self.scan.per_check_timeout_ms == 0 {
            return Err(invalid("scan.per_check_timeout_ms", "must be at least 1"));
        }
        if self.scan.interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(invalid(
                "scan.interval_minutes",
                format!("must be at most {} (30 days)", MAX_INTERVAL_MINUTES),
            ));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json" | "compact") {
            return Err(invalid(
                "logging.format",
                format!("unknown format '{}'", self.logging.format),
            ));
        }
        Ok(())
    }
}

/// Longest accepted daemon interval
pub const MAX_INTERVAL_MINUTES: u64 = 30 * 24 * 60;

fn invalid(key: &str, message: impl Into<String>) -> Error {
    Error::InvalidConfig {
        key: key.to_string(),
        message: message.into(),
    }
}

fn parse_var<T>(key: &str, val: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    val.trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, format!("'{}': {}", val, e)))
}

/// Runner and aggregation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Maximum checks in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency_limit: usize,

    /// Deadline for a single check in milliseconds
    #[serde(default = "default_check_timeout")]
    pub per_check_timeout_ms: u64,

    /// Severity given to checks that could not be evaluated
    #[serde(default = "default_unevaluated")]
    pub unevaluated_severity: Severity,

    /// Minutes between scans in daemon mode (0 = one shot)
    #[serde(default)]
    pub interval_minutes: u64,

    /// Run only these check ids (empty = all enabled by default)
    #[serde(default)]
    pub only: Vec<ResultId>,

    /// Never run these check ids
    #[serde(default)]
    pub skip: Vec<ResultId>,
}

/// Checks are I/O bound, so the pool is wider than the core count
fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 4
}

fn default_check_timeout() -> u64 {
    5000
}

fn default_unevaluated() -> Severity {
    Severity::Low
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency(),
            per_check_timeout_ms: default_check_timeout(),
            unevaluated_severity: default_unevaluated(),
            interval_minutes: 0,
            only: vec![],
            skip: vec![],
        }
    }
}

impl ScanConfig {
    pub fn per_check_timeout(&self) -> Duration {
        Duration::from_millis(self.per_check_timeout_ms)
    }

    /// `None` in one-shot mode
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_minutes > 0)
            .then(|| Duration::from_secs(self.interval_minutes.saturating_mul(60)))
    }
}

/// Browser profile configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Profile directories to inspect. Empty means the binary derives them
    /// from the environment.
    #[serde(default)]
    pub profile_roots: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    String::from("info")
}

fn default_log_format() -> String {
    String::from("pretty")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Builder for constructing Config
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.config.scan.concurrency_limit = limit;
        self
    }

    pub fn per_check_timeout(mut self, timeout: Duration) -> Self {
        self.config.scan.per_check_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn unevaluated_severity(mut self, severity: Severity) -> Self {
        self.config.scan.unevaluated_severity = severity;
        self
    }

    pub fn interval_minutes(mut self, minutes: u64) -> Self {
        self.config.scan.interval_minutes = minutes;
        self
    }

    pub fn only(mut self, ids: impl IntoIterator<Item = ResultId>) -> Self {
        self.config.scan.only = ids.into_iter().collect();
        self
    }

    pub fn profile_root(mut self, root: impl Into<String>) -> Self {
        self.config.browser.profile_roots.push(root.into());
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

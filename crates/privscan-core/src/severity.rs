//! Severity levels and check categories

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Severity level for outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Inspection completed, nothing wrong
    #[default]
    Info,
    /// Minor exposure
    Low,
    /// Noticeable privacy or security exposure
    Medium,
    /// Significant exposure
    High,
    /// Immediate action required
    Critical,
}

impl Severity {
    /// All levels, lowest first
    pub const ALL: [Severity; 5] = [
        Severity::Info,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    /// Numeric value used as histogram index
    pub fn as_number(&self) -> u8 {
        match self {
            Severity::Info => 0,
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    /// Same spelling as the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// Category a check reports under
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckCategory {
    /// Operating system identity and patch level
    System,
    /// Telemetry, advertising, and tracking settings
    Privacy,
    /// Browser profiles and extensions
    Browser,
    /// Installed and auto-starting applications
    Applications,
    /// Outcome whose id is not in the catalog
    Uncategorized,
}

impl CheckCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckCategory::System => "system",
            CheckCategory::Privacy => "privacy",
            CheckCategory::Browser => "browser",
            CheckCategory::Applications => "applications",
            CheckCategory::Uncategorized => "uncategorized",
        }
    }
}

impl std::fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

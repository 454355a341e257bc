//! Registry policy checks - one value compared against a hardened setting

use privscan_core::{
    lookup_integer, lookup_string, AccessResultExt, Capabilities, Check, CheckContext,
    CheckMetadata, CheckOutcome, CheckResult, ResultId,
};
use tracing::debug;

/// The value a hardened machine has
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedValue {
    Dword(u64),
    /// Compared case-insensitively
    String(String),
}

impl std::fmt::Display for ExpectedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectedValue::Dword(v) => write!(f, "0x{:08x} ({})", v, v),
            ExpectedValue::String(s) => write!(f, "{}", s),
        }
    }
}

/// Compares one registry value with its expected setting.
///
/// An absent key or value means the OS default is in effect, and every
/// setting checked here defaults to the permissive choice, so absence is a
/// finding rather than an error. A value of the wrong type is a parse failure.
pub struct RegistryPolicyCheck {
    metadata: CheckMetadata,
    path: String,
    value_name: String,
    expected: ExpectedValue,
}

impl RegistryPolicyCheck {
    pub fn new(
        metadata: CheckMetadata,
        path: impl Into<String>,
        value_name: impl Into<String>,
        expected: ExpectedValue,
    ) -> Self {
        Self {
            metadata,
            path: path.into(),
            value_name: value_name.into(),
            expected,
        }
    }

    fn location(&self) -> String {
        format!(r"{}\{}", self.path, self.value_name)
    }
}

impl Check for RegistryPolicyCheck {
    fn id(&self) -> ResultId {
        self.metadata.id
    }

    fn metadata(&self) -> &CheckMetadata {
        &self.metadata
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::KEYS
    }

    fn execute(&self, ctx: &CheckContext) -> CheckResult {
        let keys = ctx.keys().for_check(self.id())?;

        let actual = match &self.expected {
            ExpectedValue::Dword(_) => lookup_integer(keys, &self.path, &self.value_name)
                .for_check(self.id())?
                .map(ExpectedValue::Dword),
            ExpectedValue::String(_) => lookup_string(keys, &self.path, &self.value_name)
                .for_check(self.id())?
                .map(ExpectedValue::String),
        };

        let Some(actual) = actual else {
            debug!("{} not set", self.location());
            return Ok(CheckOutcome::finding(
                self.id(),
                self.metadata.severity,
                [
                    self.location(),
                    "not set".to_string(),
                    format!("expected {}", self.expected),
                ],
            ));
        };

        let matches = match (&actual, &self.expected) {
            (ExpectedValue::Dword(a), ExpectedValue::Dword(e)) => a == e,
            (ExpectedValue::String(a), ExpectedValue::String(e)) => a.eq_ignore_ascii_case(e),
            _ => false,
        };

        if matches {
            Ok(CheckOutcome::clear(
                self.id(),
                [self.location(), actual.to_string()],
            ))
        } else {
            Ok(CheckOutcome::finding(
                self.id(),
                self.metadata.severity,
                [
                    self.location(),
                    actual.to_string(),
                    format!("expected {}", self.expected),
                ],
            ))
        }
    }
}

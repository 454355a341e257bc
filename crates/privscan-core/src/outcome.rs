//! Check outcomes - the single value every check invocation produces

use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Stable identifier of a check and of the outcome it produces.
///
/// Ids are never reused across catalog versions; downstream reporting keys its
/// localized message templates on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultId(pub u32);

impl std::fmt::Display for ResultId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ResultId {
    fn from(value: u32) -> Self {
        ResultId(value)
    }
}

/// Classification of a check that could not complete its inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Path, key, or file absent, or access denied
    ResourceUnavailable,
    /// Data was read but could not be used
    ParseFailure,
    /// The check exceeded its deadline
    Timeout,
    /// The resource had to be copied before reading and the copy failed
    PartialDataLoss,
    /// Anything unclassified, including panics
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ResourceUnavailable => "resource_unavailable",
            ErrorKind::ParseFailure => "parse_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::PartialDataLoss => "partial_data_loss",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Underlying cause attached to a [`CheckError`]
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// A check that could not complete its inspection.
///
/// Distinct from "inspection completed and found nothing wrong", which is a
/// normal [`CheckOutcome`] at [`Severity::Info`].
#[derive(Error, Debug, Clone)]
#[error("check {id} failed ({kind}): {message}")]
pub struct CheckError {
    id: ResultId,
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<Cause>,
}

impl CheckError {
    pub fn new(id: ResultId, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn resource_unavailable(id: ResultId, message: impl Into<String>) -> Self {
        Self::new(id, ErrorKind::ResourceUnavailable, message)
    }

    pub fn parse_failure(id: ResultId, message: impl Into<String>) -> Self {
        Self::new(id, ErrorKind::ParseFailure, message)
    }

    pub fn partial_data_loss(id: ResultId, message: impl Into<String>) -> Self {
        Self::new(id, ErrorKind::PartialDataLoss, message)
    }

    pub fn unknown(id: ResultId, message: impl Into<String>) -> Self {
        Self::new(id, ErrorKind::Unknown, message)
    }

    pub fn timeout(id: ResultId, deadline: Duration) -> Self {
        Self::new(
            id,
            ErrorKind::Timeout,
            format!("check did not finish within {}ms", deadline.as_millis()),
        )
    }

    /// Attach the underlying cause
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Attach an already shared cause
    pub fn with_shared_cause(mut self, cause: Cause) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn id(&self) -> ResultId {
        self.id
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }
}

impl PartialEq for CheckError {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.kind == other.kind && self.message == other.message
    }
}

impl Eq for CheckError {}

/// What an outcome carries: a finding or the error that replaced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Ordered fields describing what was found
    Finding(Vec<String>),
    /// The check could not complete
    Error(CheckError),
}

/// The normalized result of one check invocation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    id: ResultId,
    severity: Severity,
    payload: Payload,
}

/// Result of executing a check
pub type CheckResult = std::result::Result<CheckOutcome, CheckError>;

impl CheckOutcome {
    /// A completed inspection at the given severity
    pub fn finding<I, S>(id: ResultId, severity: Severity, evidence: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id,
            severity,
            payload: Payload::Finding(evidence.into_iter().map(Into::into).collect()),
        }
    }

    /// A completed inspection that found nothing wrong
    pub fn clear<I, S>(id: ResultId, evidence: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::finding(id, Severity::Info, evidence)
    }

    /// Fold an error into the uniform outcome shape at the given severity
    pub fn from_error(error: CheckError, severity: Severity) -> Self {
        Self {
            id: error.id(),
            severity,
            payload: Payload::Error(error),
        }
    }

    pub fn id(&self) -> ResultId {
        self.id
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn evidence(&self) -> Option<&[String]> {
        match &self.payload {
            Payload::Finding(fields) => Some(fields),
            Payload::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&CheckError> {
        match &self.payload {
            Payload::Finding(_) => None,
            Payload::Error(err) => Some(err),
        }
    }

    /// One-line summary for reporting
    pub fn summary(&self) -> String {
        match &self.payload {
            Payload::Finding(fields) if fields.is_empty() => String::from("no details"),
            Payload::Finding(fields) => fields.join("; "),
            Payload::Error(err) => format!("could not evaluate ({}): {}", err.kind(), err.message()),
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::BringupError;

// ---------------------------------------------------------------------------
// FailureKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    MissingInput,
    ExternalCommand,
    Timeout,
    ResourceApply,
    ClusterConflict,
}

impl FailureKind {
    /// The `reason` string reported for failures of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::MissingInput => "MissingInput",
            FailureKind::ExternalCommand => "ExternalCommandError",
            FailureKind::Timeout => "timeout",
            FailureKind::ResourceApply => "ResourceApplyError",
            FailureKind::ClusterConflict => "ClusterConflict",
        }
    }

    pub fn retryable(self) -> bool {
        matches!(self, FailureKind::ExternalCommand | FailureKind::Timeout)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Failure / Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    pub retryable: bool,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.retryable(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn reason(&self) -> &'static str {
        self.kind.as_str()
    }
}

impl From<BringupError> for Failure {
    fn from(err: BringupError) -> Self {
        Failure {
            kind: err.kind(),
            retryable: err.retryable(),
            message: err.to_string(),
        }
    }
}

/// Result of a step, an apply or a wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure(Failure),
}

impl Outcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Outcome::Failure(Failure::new(kind, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn as_failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Success => None,
            Outcome::Failure(f) => Some(f),
        }
    }

    /// Short label used for metric tags and summaries.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure(_) => "failure",
        }
    }

    /// Bridge to `?`-style composition inside step actions.
    pub fn into_result(self) -> std::result::Result<(), Failure> {
        match self {
            Outcome::Success => Ok(()),
            Outcome::Failure(f) => Err(f),
        }
    }
}

impl From<std::result::Result<(), Failure>> for Outcome {
    fn from(res: std::result::Result<(), Failure>) -> Self {
        match res {
            Ok(()) => Outcome::Success,
            Err(f) => Outcome::Failure(f),
        }
    }
}

impl From<crate::error::Result<()>> for Outcome {
    fn from(res: crate::error::Result<()>) -> Self {
        match res {
            Ok(()) => Outcome::Success,
            Err(e) => Outcome::Failure(e.into()),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("succeeded"),
            Outcome::Failure(fail) => write!(
                f,
                "failed ({}, retryable={}): {}",
                fail.reason(),
                fail.retryable,
                fail.message
            ),
        }
    }
}

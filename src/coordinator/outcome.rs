use crate::core::{DbError, Row};
use serde::Serialize;
use std::fmt;

/// Why a request was turned down before anything was written
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum Rejection {
    PreconditionFailed(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::PreconditionFailed(description) => {
                write!(f, "precondition failed: {}", description)
            }
        }
    }
}

/// Why a request that got past its checks did not commit
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "failure", content = "detail", rename_all = "snake_case")]
pub enum Failure {
    /// BLOCKING wait exceeded its limit
    Timeout,
    /// The store refused the commit
    Conflict(String),
    /// Anything else, with the full error text
    Unexpected(String),
}

impl Failure {
    /// Whether running the same request again may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Failure::Timeout | Failure::Conflict(_))
    }
}

impl From<DbError> for Failure {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Conflict(detail) => Failure::Conflict(detail),
            other => Failure::Unexpected(other.to_string()),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Timeout => write!(f, "timed out waiting for row lock"),
            Failure::Conflict(detail) => write!(f, "conflict: {}", detail),
            Failure::Unexpected(detail) => write!(f, "unexpected error: {}", detail),
        }
    }
}

/// Result of one coordinated mutation; exactly one per attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Committed { row: Row },
    Rejected { rejection: Rejection },
    LockUnavailable,
    Skipped,
    NotFound,
    Failed { failure: Failure },
}

/// Outcome discriminant, used for aggregate counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Committed,
    Rejected,
    LockUnavailable,
    Skipped,
    NotFound,
    Failed,
}

impl Outcome {
    pub fn committed(row: Row) -> Self {
        Outcome::Committed { row }
    }

    pub fn rejected(rejection: Rejection) -> Self {
        Outcome::Rejected { rejection }
    }

    pub fn failed(failure: impl Into<Failure>) -> Self {
        Outcome::Failed {
            failure: failure.into(),
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Committed { .. } => OutcomeKind::Committed,
            Outcome::Rejected { .. } => OutcomeKind::Rejected,
            Outcome::LockUnavailable => OutcomeKind::LockUnavailable,
            Outcome::Skipped => OutcomeKind::Skipped,
            Outcome::NotFound => OutcomeKind::NotFound,
            Outcome::Failed { .. } => OutcomeKind::Failed,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Outcome::Committed { .. })
    }

    pub fn committed_row(&self) -> Option<&Row> {
        match self {
            Outcome::Committed { row } => Some(row),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Failed { failure } => Some(failure),
            _ => None,
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OutcomeKind::Committed => "committed",
            OutcomeKind::Rejected => "rejected",
            OutcomeKind::LockUnavailable => "lock_unavailable",
            OutcomeKind::Skipped => "skipped",
            OutcomeKind::NotFound => "not_found",
            OutcomeKind::Failed => "failed",
        };
        write!(f, "{label}")
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Committed { row } => write!(f, "committed (version {})", row.version),
            Outcome::Rejected { rejection } => write!(f, "rejected: {}", rejection),
            Outcome::LockUnavailable => write!(f, "lock unavailable"),
            Outcome::Skipped => write!(f, "skipped (row locked)"),
            Outcome::NotFound => write!(f, "not found"),
            Outcome::Failed { failure } => write!(f, "failed: {}", failure),
        }
    }
}

// ============================================================================
// Row Lock Strategies
// ============================================================================
//
// What a transaction does when the row it wants is already locked by another
// in-flight transaction:
//
//   BLOCKING     wait for the holder to commit/rollback, then continue with
//                the row as the holder left it
//   NOWAIT       fail at once, the caller never suspends
//   SKIP_LOCKED  act as if the row were not there
//
// ============================================================================

use crate::core::{DbError, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Suspend until the lock is released
    Blocking,
    /// Fail immediately with `LockNotAvailable`
    NoWait,
    /// Exclude the locked row from the result
    SkipLocked,
}

impl LockMode {
    pub const ALL: [LockMode; 3] = [LockMode::Blocking, LockMode::NoWait, LockMode::SkipLocked];

    /// The SQL locking clause this mode corresponds to
    pub fn sql_clause(&self) -> &'static str {
        match self {
            LockMode::Blocking => "FOR UPDATE",
            LockMode::NoWait => "FOR UPDATE NOWAIT",
            LockMode::SkipLocked => "FOR UPDATE SKIP LOCKED",
        }
    }

    /// Only blocking acquisition may suspend the caller
    pub fn may_suspend(&self) -> bool {
        matches!(self, LockMode::Blocking)
    }

    /// The result a contended acquisition produces without waiting, or `None`
    /// when the mode waits for the holder instead
    pub fn on_contention(&self) -> Option<LockAcquisition> {
        match self {
            LockMode::Blocking => None,
            LockMode::NoWait => Some(LockAcquisition::Unavailable),
            LockMode::SkipLocked => Some(LockAcquisition::Skipped),
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LockMode::Blocking => "blocking",
            LockMode::NoWait => "nowait",
            LockMode::SkipLocked => "skip_locked",
        };
        write!(f, "{label}")
    }
}

impl FromStr for LockMode {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "blocking" | "for_update" => Ok(LockMode::Blocking),
            "nowait" | "no_wait" => Ok(LockMode::NoWait),
            "skip_locked" | "skiplocked" => Ok(LockMode::SkipLocked),
            other => Err(DbError::InvalidRequest(format!("unknown lock mode '{other}'"))),
        }
    }
}

/// Result of one lock attempt on an existing row
#[derive(Debug, Clone, PartialEq)]
pub enum LockAcquisition {
    /// Lock held; the row as of acquisition
    Acquired(Row),
    /// Held elsewhere and the mode does not wait
    Unavailable,
    /// Held elsewhere and the mode skips locked rows
    Skipped,
}

impl LockAcquisition {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockAcquisition::Acquired(_))
    }
}

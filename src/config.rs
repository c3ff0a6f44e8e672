use crate::coordinator::RetryPolicy;
use crate::core::DbError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Commit-time isolation check applied by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Last writer wins; unlocked read-modify-write can lose updates
    #[default]
    ReadCommitted,
    /// Commit fails if an updated row changed since this transaction read it
    RepeatableRead,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationLevel::ReadCommitted => write!(f, "read_committed"),
            IsolationLevel::RepeatableRead => write!(f, "repeatable_read"),
        }
    }
}

impl FromStr for IsolationLevel {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "read_committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable_read" => Ok(IsolationLevel::RepeatableRead),
            other => Err(DbError::Config(format!("unknown isolation level '{other}'"))),
        }
    }
}

/// Row store configuration
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Isolation check applied at commit
    pub isolation: IsolationLevel,

    /// Locks held longer than this are reclaimed from their holder by the
    /// next blocking waiter. `None` keeps locks until commit/rollback.
    pub max_lock_hold: Option<Duration>,
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level
    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Set the lock reclamation limit
    pub fn max_lock_hold(mut self, limit: Duration) -> Self {
        self.max_lock_hold = Some(limit);
        self
    }

    /// Parse from connection string
    ///
    /// Format: `memory://?isolation=repeatable_read&max_lock_hold_ms=500`
    pub fn from_url(url: &str) -> Result<Self, String> {
        let rest = url
            .strip_prefix("memory://")
            .ok_or_else(|| "URL must start with 'memory://'".to_string())?;

        let query = match rest.split_once('?') {
            Some((_, query)) => query,
            None => return Ok(Self::new()),
        };

        let mut config = Self::new();
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("Invalid parameter '{}'", pair))?;
            match key {
                "isolation" => {
                    config.isolation = value.parse().map_err(|e: DbError| e.to_string())?;
                }
                "max_lock_hold_ms" => {
                    let millis: u64 = value
                        .parse()
                        .map_err(|_| format!("Invalid max_lock_hold_ms '{}'", value))?;
                    config.max_lock_hold = Some(Duration::from_millis(millis));
                }
                other => return Err(format!("Unknown parameter '{}'", other)),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Convert to connection string
    pub fn to_url(&self) -> String {
        let mut url = format!("memory://?isolation={}", self.isolation);
        if let Some(limit) = self.max_lock_hold {
            url.push_str(&format!("&max_lock_hold_ms={}", limit.as_millis()));
        }
        url
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_lock_hold == Some(Duration::ZERO) {
            return Err("max_lock_hold must be > 0".to_string());
        }
        Ok(())
    }
}

/// Mutation coordinator configuration
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    /// Wait limit for blocking acquisition when a request sets none
    pub lock_timeout: Option<Duration>,

    /// Policy used by `execute_with_retry`
    pub retry: RetryPolicy,
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default blocking wait limit
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.lock_timeout == Some(Duration::ZERO) {
            return Err("lock_timeout must be > 0".to_string());
        }
        self.retry.validate()
    }
}

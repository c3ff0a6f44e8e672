use super::EntityId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("Entity '{0}' not found")]
    NotFound(EntityId),

    #[error("Entity '{0}' already exists")]
    EntityExists(EntityId),

    #[error("Could not obtain lock on entity '{0}'")]
    LockNotAvailable(EntityId),

    #[error("Serialization conflict: {0}")]
    Conflict(String),

    #[error("Transaction {0} not found")]
    TransactionNotFound(String),

    #[error("Transaction {0} is {1}")]
    TransactionClosed(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Mutation failed: {0}")]
    Mutation(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl DbError {
    /// Serialization failures the caller may retry with a fresh transaction.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_lock_not_available(&self) -> bool {
        matches!(self, Self::LockNotAvailable(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

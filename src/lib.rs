// ============================================================================
// rowlock Library
// ============================================================================
//
// Row-level locking coordinator for concurrent single-row mutations.
//
//   SessionRunner ──> MutationCoordinator ──> RowHandle ──> Store
//        ^                                                    │
//        └──────────────────── Outcome ───────────────────────┘
//
// ============================================================================

pub mod config;
pub mod coordinator;
pub mod core;
pub mod lock;
pub mod prelude;
pub mod session;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use config::{CoordinatorConfig, IsolationLevel, StoreConfig};
pub use coordinator::{
    Failure, LockRequest, Mutation, MutationCoordinator, Outcome, OutcomeKind, Precondition,
    Rejection, RetryPolicy, RowHandle,
};
pub use crate::core::{Attributes, DbError, EntityId, Result, Row, Value, attributes};
pub use lock::{LockAcquisition, LockMode};
pub use session::{Attempt, SessionReport, SessionRunner};
pub use storage::{CommitInfo, InMemoryStore, Store, StoreStats};
pub use transaction::TransactionId;

//! Everything needed to coordinate row mutations, in one import.
//!
//! ```ignore
//! use rowlock::prelude::*;
//! ```

pub use crate::config::{CoordinatorConfig, IsolationLevel, StoreConfig};
pub use crate::coordinator::{
    Failure, LockRequest, Mutation, MutationCoordinator, Outcome, OutcomeKind, Precondition,
    Rejection, RetryPolicy,
};
pub use crate::core::{Attributes, DbError, EntityId, Result, Row, Value, attributes};
pub use crate::lock::LockMode;
pub use crate::session::{Attempt, SessionReport, SessionRunner};
pub use crate::storage::{InMemoryStore, Store};

// ============================================================================
// Mutation Coordinator
// ============================================================================
//
// One coordinated mutation of one row:
//
//   open handle ─> lock (optional) ─> precondition ─> delay ─> mutate ─> commit
//        │              │                  │                     │        │
//    NotFound   LockUnavailable /      Rejected              Failed   Committed /
//               Skipped / Timeout                                   Failed(Conflict)
//
// Each call owns its transaction end to end; every non-commit exit rolls back.
//
// ============================================================================

pub mod execute;
pub mod handle;
pub mod outcome;
pub mod request;
pub mod retry;

pub use execute::MutationCoordinator;
pub use handle::{HandleState, RowHandle};
pub use outcome::{Failure, Outcome, OutcomeKind, Rejection};
pub use request::{LockRequest, Mutation, Precondition};
pub use retry::RetryPolicy;

// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Transaction bookkeeping for the row store: identifiers, lifecycle state,
// held row locks, observed versions and buffered writes.
//
// ============================================================================

pub mod change;
pub mod state;

pub use change::Change;
pub use state::{Transaction, TransactionId, TransactionState};

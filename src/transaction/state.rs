// ============================================================================
// Transaction State Management
// ============================================================================
//
// Each transaction moves through defined states: Active -> Committed/Aborted
//
// A transaction tracks:
// - the row versions it has observed (for first-committer-wins checks)
// - the row locks it holds (released on commit or rollback)
// - its buffered writes
//
// ============================================================================

use super::Change;
use crate::core::{Attributes, DbError, EntityId, Result};
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// Unique identifier for a transaction, allocated by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state
///
/// State transitions:
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can execute operations
    Active,

    /// Transaction has been successfully committed
    Committed,

    /// Transaction has been aborted/rolled back
    Aborted,
}

impl TransactionState {
    /// Check if transaction can execute operations
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    /// Check if transaction is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// A store transaction
///
/// # Thread Safety
/// Owned by the store and only touched under the store's state lock.
#[derive(Debug)]
pub struct Transaction {
    /// Unique transaction identifier
    id: TransactionId,

    /// Current state (Active, Committed, Aborted)
    state: TransactionState,

    /// Last committed version seen per row
    observed: HashMap<EntityId, u64>,

    /// Row locks held until commit/rollback
    locks: BTreeSet<EntityId>,

    /// Buffered writes, at most one per row
    changes: Vec<Change>,

    /// Start time for diagnostics
    start_time: Instant,
}

impl Transaction {
    /// Create a new active transaction
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            observed: HashMap::new(),
            locks: BTreeSet::new(),
            changes: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Get the transaction ID
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Get the current state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Get all changes recorded in this transaction
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Get the number of changes
    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    /// Get transaction duration
    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn observe(&mut self, id: &EntityId, version: u64) {
        self.observed.insert(id.clone(), version);
    }

    pub fn observed_version(&self, id: &EntityId) -> Option<u64> {
        self.observed.get(id).copied()
    }

    pub fn hold_lock(&mut self, id: &EntityId) {
        self.locks.insert(id.clone());
    }

    pub fn holds_lock(&self, id: &EntityId) -> bool {
        self.locks.contains(id)
    }

    pub fn locks(&self) -> impl Iterator<Item = &EntityId> {
        self.locks.iter()
    }

    /// Attributes this transaction has written for `id`, if any
    pub fn pending_attributes(&self, id: &EntityId) -> Option<&Attributes> {
        self.changes
            .iter()
            .find(|change| change.entity_id() == id)
            .map(Change::attributes)
    }

    /// Whether `id` only exists as an insert buffered by this transaction
    pub fn has_pending_insert(&self, id: &EntityId) -> bool {
        self.changes
            .iter()
            .any(|change| change.is_insert() && change.entity_id() == id)
    }

    /// Record a change in this transaction
    ///
    /// A second write to the same row replaces the attributes of the first,
    /// so a pending insert stays an insert.
    ///
    /// # Errors
    /// Returns error if transaction is not active
    pub fn record_change(&mut self, change: Change) -> Result<()> {
        self.ensure_active()?;

        match self
            .changes
            .iter_mut()
            .find(|existing| existing.entity_id() == change.entity_id())
        {
            Some(existing) => existing.replace_attributes(change.attributes().clone()),
            None => self.changes.push(change),
        }
        Ok(())
    }

    /// Mark transaction as committed
    ///
    /// # Errors
    /// Returns error if transaction is not active
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Mark transaction as aborted and discard changes
    ///
    /// # Errors
    /// Returns error if transaction is not active
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.changes.clear();
        self.state = TransactionState::Aborted;
        Ok(())
    }

    /// Drop all held locks, returning them to the caller for release
    pub fn take_locks(&mut self) -> BTreeSet<EntityId> {
        std::mem::take(&mut self.locks)
    }

    pub fn ensure_active(&self) -> Result<()> {
        if !self.state.is_active() {
            return Err(DbError::TransactionClosed(
                self.id.to_string(),
                self.state.to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Value, attributes};

    fn update(id: i64, age: i64) -> Change {
        Change::UpdateRow {
            id: EntityId::Int(id),
            attributes: attributes([("age", Value::Integer(age))]),
        }
    }

    #[test]
    fn test_transaction_lifecycle() {
        let mut txn = Transaction::new(TransactionId(1));

        assert_eq!(txn.state(), TransactionState::Active);
        assert!(txn.state().is_active());
        assert!(!txn.state().is_terminal());

        txn.commit().unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(txn.state().is_terminal());
    }

    #[test]
    fn test_cannot_commit_twice() {
        let mut txn = Transaction::new(TransactionId(2));

        txn.commit().unwrap();
        assert!(matches!(
            txn.commit(),
            Err(DbError::TransactionClosed(id, state)) if id == "txn_2" && state == "COMMITTED"
        ));
    }

    #[test]
    fn test_rollback_clears_changes() {
        let mut txn = Transaction::new(TransactionId(3));

        txn.record_change(update(1, 26)).unwrap();
        assert_eq!(txn.change_count(), 1);

        txn.rollback().unwrap();
        assert_eq!(txn.change_count(), 0);
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_cannot_record_change_after_commit() {
        let mut txn = Transaction::new(TransactionId(4));
        txn.commit().unwrap();
        assert!(txn.record_change(update(1, 26)).is_err());
    }

    #[test]
    fn test_repeated_writes_coalesce() {
        let mut txn = Transaction::new(TransactionId(5));
        txn.record_change(Change::InsertRow {
            id: EntityId::Int(1),
            attributes: attributes([("age", Value::Integer(25))]),
        })
        .unwrap();
        txn.record_change(update(1, 30)).unwrap();

        assert_eq!(txn.change_count(), 1);
        assert!(txn.has_pending_insert(&EntityId::Int(1)));
        assert_eq!(
            txn.pending_attributes(&EntityId::Int(1)).unwrap()["age"],
            Value::Integer(30)
        );
    }

    #[test]
    fn test_lock_bookkeeping() {
        let mut txn = Transaction::new(TransactionId(6));
        txn.hold_lock(&EntityId::Int(9));
        assert!(txn.holds_lock(&EntityId::Int(9)));

        let released = txn.take_locks();
        assert_eq!(released.len(), 1);
        assert!(!txn.holds_lock(&EntityId::Int(9)));
    }
}

use super::table::{LockProbe, RowTable};
use super::{CommitInfo, Store};
use crate::config::{IsolationLevel, StoreConfig};
use crate::core::{Attributes, DbError, EntityId, Result, Row};
use crate::lock::LockMode;
use crate::transaction::{Change, Transaction, TransactionId};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Counters and gauges describing the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub rows: usize,
    pub active_transactions: usize,
    pub held_locks: usize,
    pub commits: u64,
    pub rollbacks: u64,
    pub conflicts: u64,
    pub reclaimed_locks: u64,
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Store Stats: {} rows, {} active txns, {} locks held, {} commits, {} rollbacks, {} conflicts, {} reclaimed",
            self.rows,
            self.active_transactions,
            self.held_locks,
            self.commits,
            self.rollbacks,
            self.conflicts,
            self.reclaimed_locks
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    commits: u64,
    rollbacks: u64,
    conflicts: u64,
    reclaimed_locks: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    table: RowTable,
    transactions: HashMap<TransactionId, Transaction>,
    counters: Counters,
}

/// What a lock probe decided, computed under the state lock
enum Acquire {
    Done(Option<Row>),
    Wait {
        released: std::sync::Arc<tokio::sync::Notify>,
        limit: Option<Duration>,
    },
    Retry,
}

impl StoreState {
    fn transaction(&self, txn: TransactionId) -> Result<&Transaction> {
        let transaction = self
            .transactions
            .get(&txn)
            .ok_or_else(|| DbError::TransactionNotFound(txn.to_string()))?;
        transaction.ensure_active()?;
        Ok(transaction)
    }

    fn transaction_mut(&mut self, txn: TransactionId) -> Result<&mut Transaction> {
        let transaction = self
            .transactions
            .get_mut(&txn)
            .ok_or_else(|| DbError::TransactionNotFound(txn.to_string()))?;
        transaction.ensure_active()?;
        Ok(transaction)
    }

    /// The row as `txn` sees it: committed state overlaid with its own writes.
    /// Rows that only exist as a pending insert carry version 0.
    fn visible_row(&self, txn: TransactionId, id: &EntityId) -> Result<Option<Row>> {
        let transaction = self.transaction(txn)?;
        let pending = transaction.pending_attributes(id);

        let row = match (self.table.get(id), pending) {
            (Some(row), Some(attributes)) => {
                Some(Row::new(id.clone(), row.version, attributes.clone()))
            }
            (Some(row), None) => Some(row.clone()),
            (None, Some(attributes)) if transaction.has_pending_insert(id) => {
                Some(Row::new(id.clone(), 0, attributes.clone()))
            }
            _ => None,
        };
        Ok(row)
    }

    fn read(&mut self, txn: TransactionId, id: &EntityId) -> Result<Option<Row>> {
        let row = self.visible_row(txn, id)?;
        if let Some(committed) = self.table.get(id) {
            let version = committed.version;
            self.transaction_mut(txn)?.observe(id, version);
        }
        Ok(row)
    }

    fn probe(
        &mut self,
        txn: TransactionId,
        id: &EntityId,
        mode: LockMode,
        max_lock_hold: Option<Duration>,
    ) -> Result<Acquire> {
        self.transaction(txn)?;

        match self.table.try_lock(id, txn) {
            LockProbe::Missing => Ok(Acquire::Done(self.visible_row(txn, id)?)),
            LockProbe::Granted => {
                self.transaction_mut(txn)?.hold_lock(id);
                Ok(Acquire::Done(self.read(txn, id)?))
            }
            LockProbe::Held { holder, released } => match mode {
                LockMode::NoWait => Err(DbError::LockNotAvailable(id.clone())),
                LockMode::SkipLocked => Ok(Acquire::Done(None)),
                LockMode::Blocking => match max_lock_hold {
                    Some(limit) if holder.held_for() >= limit => {
                        warn!(
                            holder = %holder.txn,
                            waiter = %txn,
                            entity = %id,
                            held_ms = holder.held_for().as_millis() as u64,
                            "Reclaiming row lock held past max_lock_hold"
                        );
                        self.abort(holder.txn);
                        self.counters.reclaimed_locks += 1;
                        Ok(Acquire::Retry)
                    }
                    Some(limit) => Ok(Acquire::Wait {
                        released,
                        limit: Some(limit.saturating_sub(holder.held_for())),
                    }),
                    None => Ok(Acquire::Wait {
                        released,
                        limit: None,
                    }),
                },
            },
        }
    }

    /// Abort `txn` in place and release its locks. The entry stays so the
    /// owner learns about it on its next call.
    fn abort(&mut self, txn: TransactionId) {
        let Some(transaction) = self.transactions.get_mut(&txn) else {
            return;
        };
        if transaction.rollback().is_err() {
            return;
        }
        for id in transaction.take_locks() {
            self.table.unlock(&id, txn);
        }
    }

    /// Abort and forget `txn`
    fn finish_aborted(&mut self, txn: TransactionId) {
        self.abort(txn);
        self.transactions.remove(&txn);
    }

    fn rollback(&mut self, txn: TransactionId) {
        let was_active = self
            .transactions
            .get(&txn)
            .is_some_and(|transaction| transaction.state().is_active());

        self.finish_aborted(txn);
        if was_active {
            self.counters.rollbacks += 1;
            debug!(%txn, "Transaction rolled back");
        }
    }

    /// Check every buffered write before applying any of them
    fn validate(&self, txn: TransactionId, isolation: IsolationLevel) -> Result<()> {
        let transaction = self.transaction(txn)?;

        for change in transaction.changes() {
            let id = change.entity_id();

            if let Some(holder) = self.table.lock_holder(id)
                && holder.txn != txn
            {
                return Err(DbError::Conflict(format!(
                    "row {} is locked by {}",
                    id, holder.txn
                )));
            }

            match change {
                Change::InsertRow { .. } => {
                    if self.table.contains(id) {
                        return Err(DbError::EntityExists(id.clone()));
                    }
                }
                Change::UpdateRow { .. } => {
                    let current = self
                        .table
                        .get(id)
                        .ok_or_else(|| DbError::NotFound(id.clone()))?;

                    if isolation == IsolationLevel::RepeatableRead
                        && let Some(observed) = transaction.observed_version(id)
                        && observed != current.version
                    {
                        return Err(DbError::Conflict(format!(
                            "row {} changed since read (version {} -> {})",
                            id, observed, current.version
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// In-memory row store with per-row exclusive locks
///
/// All bookkeeping sits behind one async mutex that is never held while a
/// caller waits for a row lock; waiters park on the row's release signal.
pub struct InMemoryStore {
    config: StoreConfig,
    state: Mutex<StoreState>,
    next_txn_id: AtomicU64,
}

impl InMemoryStore {
    /// # Errors
    /// `DbError::Config` when `config` fails validation.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate().map_err(DbError::Config)?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: StoreConfig) -> Self {
        Self {
            config,
            state: Mutex::new(StoreState::default()),
            next_txn_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Insert a committed row outside any transaction
    pub async fn seed(&self, id: impl Into<EntityId>, attributes: Attributes) -> Result<Row> {
        let id = id.into();
        let mut state = self.state.lock().await;
        if state.table.contains(&id) {
            return Err(DbError::EntityExists(id));
        }
        state.table.insert(id.clone(), attributes);
        state
            .table
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::ExecutionError(format!("seeded row {} vanished", id)))
    }

    /// Latest committed state of a row
    pub async fn fetch(&self, id: &EntityId) -> Option<Row> {
        self.state.lock().await.table.get(id).cloned()
    }

    pub async fn stats(&self) -> StoreStats {
        let state = self.state.lock().await;
        StoreStats {
            rows: state.table.len(),
            active_transactions: state
                .transactions
                .values()
                .filter(|txn| txn.state().is_active())
                .count(),
            held_locks: state.table.locked_count(),
            commits: state.counters.commits,
            rollbacks: state.counters.rollbacks,
            conflicts: state.counters.conflicts,
            reclaimed_locks: state.counters.reclaimed_locks,
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_valid_config(StoreConfig::default())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin_transaction(&self) -> Result<TransactionId> {
        let txn = TransactionId(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        let mut state = self.state.lock().await;
        state.transactions.insert(txn, Transaction::new(txn));
        debug!(%txn, "Transaction started");
        Ok(txn)
    }

    async fn select_for_update(
        &self,
        txn: TransactionId,
        id: &EntityId,
        mode: LockMode,
    ) -> Result<Option<Row>> {
        loop {
            let mut state = self.state.lock().await;
            let (released, limit) =
                match state.probe(txn, id, mode, self.config.max_lock_hold)? {
                    Acquire::Done(row) => {
                        if row.is_some() {
                            debug!(%txn, entity = %id, %mode, "Row lock acquired");
                        }
                        return Ok(row);
                    }
                    Acquire::Retry => continue,
                    Acquire::Wait { released, limit } => (released, limit),
                };

            // Register before releasing the state lock so a release in
            // between is not missed.
            let notified = released.notified();
            drop(state);

            debug!(%txn, entity = %id, "Waiting for row lock");
            match limit {
                Some(limit) => {
                    let _ = tokio::time::timeout(limit, notified).await;
                }
                None => notified.await,
            }
        }
    }

    async fn select_plain(&self, txn: TransactionId, id: &EntityId) -> Result<Option<Row>> {
        self.state.lock().await.read(txn, id)
    }

    async fn insert(
        &self,
        txn: TransactionId,
        id: EntityId,
        attributes: Attributes,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.table.contains(&id) || state.transaction(txn)?.has_pending_insert(&id) {
            return Err(DbError::EntityExists(id));
        }
        state
            .transaction_mut(txn)?
            .record_change(Change::InsertRow { id, attributes })
    }

    async fn update(
        &self,
        txn: TransactionId,
        id: &EntityId,
        attributes: Attributes,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.visible_row(txn, id)?.is_none() {
            return Err(DbError::NotFound(id.clone()));
        }
        state.transaction_mut(txn)?.record_change(Change::UpdateRow {
            id: id.clone(),
            attributes,
        })
    }

    async fn commit(&self, txn: TransactionId) -> Result<CommitInfo> {
        let mut state = self.state.lock().await;

        if let Some(err) = state.transaction(txn).err() {
            state.transactions.remove(&txn);
            return Err(err);
        }

        if let Err(err) = state.validate(txn, self.config.isolation) {
            if err.is_conflict() {
                state.counters.conflicts += 1;
            }
            state.counters.rollbacks += 1;
            state.finish_aborted(txn);
            debug!(%txn, error = %err, "Commit rejected");
            return Err(err);
        }

        let StoreState {
            table,
            transactions,
            counters,
        } = &mut *state;
        let Some(mut transaction) = transactions.remove(&txn) else {
            return Err(DbError::TransactionNotFound(txn.to_string()));
        };

        let mut versions = BTreeMap::new();
        for change in transaction.changes() {
            let id = change.entity_id().clone();
            let version = match change {
                Change::InsertRow { attributes, .. } => table.insert(id.clone(), attributes.clone()),
                Change::UpdateRow { attributes, .. } => table
                    .update(&id, attributes.clone())
                    .ok_or_else(|| DbError::NotFound(id.clone()))?,
            };
            versions.insert(id, version);
        }

        transaction.commit()?;
        for id in transaction.take_locks() {
            table.unlock(&id, txn);
        }
        counters.commits += 1;

        debug!(
            %txn,
            rows = versions.len(),
            duration_ms = transaction.duration().as_millis() as u64,
            "Transaction committed"
        );
        Ok(CommitInfo { txn, versions })
    }

    async fn rollback(&self, txn: TransactionId) -> Result<()> {
        self.state.lock().await.rollback(txn);
        Ok(())
    }

    fn try_abort(&self, txn: TransactionId) -> bool {
        match self.state.try_lock() {
            Ok(mut state) => {
                state.rollback(txn);
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Value, attributes};
    use std::sync::Arc;

    async fn store_with_ticket() -> InMemoryStore {
        let store = InMemoryStore::default();
        store
            .seed(1, attributes([("status", Value::from("available"))]))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_update_is_invisible_until_commit() {
        let store = store_with_ticket().await;
        let id = EntityId::Int(1);

        let txn = store.begin_transaction().await.unwrap();
        store
            .update(txn, &id, attributes([("status", Value::from("sold"))]))
            .await
            .unwrap();

        let own = store.select_plain(txn, &id).await.unwrap().unwrap();
        assert_eq!(own.get_str("status"), Some("sold"));
        assert_eq!(store.fetch(&id).await.unwrap().get_str("status"), Some("available"));

        let info = store.commit(txn).await.unwrap();
        assert_eq!(info.version_of(&id), Some(2));
        assert_eq!(store.fetch(&id).await.unwrap().get_str("status"), Some("sold"));
    }

    #[tokio::test]
    async fn test_rollback_discards_writes_and_is_idempotent() {
        let store = store_with_ticket().await;
        let id = EntityId::Int(1);

        let txn = store.begin_transaction().await.unwrap();
        store
            .select_for_update(txn, &id, LockMode::Blocking)
            .await
            .unwrap();
        store
            .update(txn, &id, attributes([("status", Value::from("sold"))]))
            .await
            .unwrap();
        store.rollback(txn).await.unwrap();
        store.rollback(txn).await.unwrap();

        let row = store.fetch(&id).await.unwrap();
        assert_eq!(row.version, 1);
        assert_eq!(row.get_str("status"), Some("available"));

        let stats = store.stats().await;
        assert_eq!(stats.held_locks, 0);
        assert_eq!(stats.rollbacks, 1);
    }

    #[tokio::test]
    async fn test_nowait_and_skip_locked_on_held_row() {
        let store = store_with_ticket().await;
        let id = EntityId::Int(1);

        let holder = store.begin_transaction().await.unwrap();
        assert!(
            store
                .select_for_update(holder, &id, LockMode::Blocking)
                .await
                .unwrap()
                .is_some()
        );

        let other = store.begin_transaction().await.unwrap();
        let err = store
            .select_for_update(other, &id, LockMode::NoWait)
            .await
            .unwrap_err();
        assert!(err.is_lock_not_available());

        let skipped = store
            .select_for_update(other, &id, LockMode::SkipLocked)
            .await
            .unwrap();
        assert!(skipped.is_none());

        let plain = store.select_plain(other, &id).await.unwrap();
        assert!(plain.is_some());
    }

    #[tokio::test]
    async fn test_blocking_waiter_sees_committed_row() {
        let store = Arc::new(store_with_ticket().await);
        let id = EntityId::Int(1);

        let holder = store.begin_transaction().await.unwrap();
        store
            .select_for_update(holder, &id, LockMode::Blocking)
            .await
            .unwrap();

        let waiter = {
            let store = Arc::clone(&store);
            let id = id.clone();
            tokio::spawn(async move {
                let txn = store.begin_transaction().await.unwrap();
                let row = store
                    .select_for_update(txn, &id, LockMode::Blocking)
                    .await
                    .unwrap()
                    .unwrap();
                store.rollback(txn).await.unwrap();
                row
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        store
            .update(holder, &id, attributes([("status", Value::from("sold"))]))
            .await
            .unwrap();
        store.commit(holder).await.unwrap();

        let row = waiter.await.unwrap();
        assert_eq!(row.version, 2);
        assert_eq!(row.get_str("status"), Some("sold"));
    }

    #[tokio::test]
    async fn test_write_to_row_locked_elsewhere_conflicts() {
        let store = store_with_ticket().await;
        let id = EntityId::Int(1);

        let holder = store.begin_transaction().await.unwrap();
        store
            .select_for_update(holder, &id, LockMode::Blocking)
            .await
            .unwrap();

        let blind = store.begin_transaction().await.unwrap();
        store
            .update(blind, &id, attributes([("status", Value::from("sold"))]))
            .await
            .unwrap();
        assert!(store.commit(blind).await.unwrap_err().is_conflict());
        assert_eq!(store.stats().await.conflicts, 1);
    }

    #[tokio::test]
    async fn test_repeatable_read_rejects_stale_update() {
        let store = InMemoryStore::new(StoreConfig::new().isolation(IsolationLevel::RepeatableRead))
            .unwrap();
        store
            .seed(1, attributes([("age", Value::Integer(25))]))
            .await
            .unwrap();
        let id = EntityId::Int(1);

        let first = store.begin_transaction().await.unwrap();
        let second = store.begin_transaction().await.unwrap();
        store.select_plain(first, &id).await.unwrap();
        store.select_plain(second, &id).await.unwrap();

        store
            .update(first, &id, attributes([("age", Value::Integer(26))]))
            .await
            .unwrap();
        store.commit(first).await.unwrap();

        store
            .update(second, &id, attributes([("age", Value::Integer(26))]))
            .await
            .unwrap();
        assert!(store.commit(second).await.unwrap_err().is_conflict());
        assert_eq!(store.fetch(&id).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_insert_then_commit() {
        let store = InMemoryStore::default();
        let id = EntityId::new_v7();

        let txn = store.begin_transaction().await.unwrap();
        store
            .insert(txn, id.clone(), attributes([("name", Value::from("Batman"))]))
            .await
            .unwrap();
        assert!(matches!(
            store.insert(txn, id.clone(), Attributes::new()).await,
            Err(DbError::EntityExists(_))
        ));

        let pending = store.select_plain(txn, &id).await.unwrap().unwrap();
        assert_eq!(pending.version, 0);

        store.commit(txn).await.unwrap();
        assert_eq!(store.fetch(&id).await.unwrap().version, 1);
    }

    #[test]
    fn test_zero_max_lock_hold_is_rejected() {
        let config = StoreConfig::new().max_lock_hold(Duration::ZERO);
        assert!(matches!(InMemoryStore::new(config), Err(DbError::Config(_))));
    }

    #[tokio::test]
    async fn test_try_abort_releases_locks_without_waiting() {
        let store = store_with_ticket().await;
        let id = EntityId::Int(1);
        let txn = store.begin_transaction().await.unwrap();
        store
            .select_for_update(txn, &id, LockMode::Blocking)
            .await
            .unwrap();

        {
            let _busy = store.state.lock().await;
            assert!(!store.try_abort(txn));
        }
        assert!(store.try_abort(txn));

        let stats = store.stats().await;
        assert_eq!(stats.held_locks, 0);
        assert_eq!(stats.active_transactions, 0);
    }

    #[tokio::test]
    async fn test_stale_lock_is_reclaimed() {
        let store = InMemoryStore::new(StoreConfig::new().max_lock_hold(Duration::from_millis(30)))
            .unwrap();
        store
            .seed(1, attributes([("status", Value::from("available"))]))
            .await
            .unwrap();
        let id = EntityId::Int(1);

        let crashed = store.begin_transaction().await.unwrap();
        store
            .select_for_update(crashed, &id, LockMode::Blocking)
            .await
            .unwrap();

        let waiter = store.begin_transaction().await.unwrap();
        let row = store
            .select_for_update(waiter, &id, LockMode::Blocking)
            .await
            .unwrap();
        assert!(row.is_some());
        assert_eq!(store.stats().await.reclaimed_locks, 1);

        assert!(matches!(
            store.commit(crashed).await,
            Err(DbError::TransactionClosed(_, _))
        ));
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let store = store_with_ticket().await;
        assert!(matches!(
            store.commit(TransactionId(999)).await,
            Err(DbError::TransactionNotFound(_))
        ));
        assert!(store.rollback(TransactionId(999)).await.is_ok());
    }

    #[test]
    fn test_stats_display() {
        let stats = StoreStats {
            rows: 3,
            commits: 2,
            ..Default::default()
        };
        assert!(stats.to_string().starts_with("Store Stats: 3 rows"));
    }
}

pub mod memory;
pub mod table;

pub use memory::{InMemoryStore, StoreStats};
pub use table::{LockHolder, RowTable};

use crate::core::{Attributes, EntityId, Result, Row};
use crate::lock::LockMode;
use crate::transaction::TransactionId;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Row versions written by a committed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub txn: TransactionId,
    pub versions: BTreeMap<EntityId, u64>,
}

impl CommitInfo {
    pub fn version_of(&self, id: &EntityId) -> Option<u64> {
        self.versions.get(id).copied()
    }
}

/// Backing store with row-level locking
///
/// The row lock of record lives here, not in the caller. Every method takes
/// the transaction it runs in; a transaction is owned by exactly one caller.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn begin_transaction(&self) -> Result<TransactionId>;

    /// `SELECT … FOR UPDATE [NOWAIT | SKIP LOCKED]` on one row.
    ///
    /// - `Ok(None)` when the row does not exist, or is locked and `mode` is
    ///   `SkipLocked`.
    /// - `Err(DbError::LockNotAvailable)` when locked and `mode` is `NoWait`.
    /// - Suspends while locked and `mode` is `Blocking`.
    async fn select_for_update(
        &self,
        txn: TransactionId,
        id: &EntityId,
        mode: LockMode,
    ) -> Result<Option<Row>>;

    /// Read without taking a row lock
    async fn select_plain(&self, txn: TransactionId, id: &EntityId) -> Result<Option<Row>>;

    async fn insert(&self, txn: TransactionId, id: EntityId, attributes: Attributes)
    -> Result<()>;

    async fn update(&self, txn: TransactionId, id: &EntityId, attributes: Attributes)
    -> Result<()>;

    /// Fails with `DbError::Conflict` when the isolation check rejects the
    /// write set. The transaction is finished either way.
    async fn commit(&self, txn: TransactionId) -> Result<CommitInfo>;

    /// Discard the transaction's writes and release its locks.
    /// Rolling back an unknown or finished transaction is a no-op.
    async fn rollback(&self, txn: TransactionId) -> Result<()>;

    /// Roll back without awaiting, for callers that cannot suspend.
    ///
    /// Returns `true` when `txn` is finished on return. Stores that have no
    /// synchronous path keep the default and return `false`.
    fn try_abort(&self, _txn: TransactionId) -> bool {
        false
    }
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn begin_transaction(&self) -> Result<TransactionId> {
        (**self).begin_transaction().await
    }

    async fn select_for_update(
        &self,
        txn: TransactionId,
        id: &EntityId,
        mode: LockMode,
    ) -> Result<Option<Row>> {
        (**self).select_for_update(txn, id, mode).await
    }

    async fn select_plain(&self, txn: TransactionId, id: &EntityId) -> Result<Option<Row>> {
        (**self).select_plain(txn, id).await
    }

    async fn insert(
        &self,
        txn: TransactionId,
        id: EntityId,
        attributes: Attributes,
    ) -> Result<()> {
        (**self).insert(txn, id, attributes).await
    }

    async fn update(
        &self,
        txn: TransactionId,
        id: &EntityId,
        attributes: Attributes,
    ) -> Result<()> {
        (**self).update(txn, id, attributes).await
    }

    async fn commit(&self, txn: TransactionId) -> Result<CommitInfo> {
        (**self).commit(txn).await
    }

    async fn rollback(&self, txn: TransactionId) -> Result<()> {
        (**self).rollback(txn).await
    }

    fn try_abort(&self, txn: TransactionId) -> bool {
        (**self).try_abort(txn)
    }
}

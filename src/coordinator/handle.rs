use super::Mutation;
use crate::core::{DbError, EntityId, Result, Row};
use crate::lock::{LockAcquisition, LockMode};
use crate::storage::Store;
use crate::transaction::TransactionId;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle of a row handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Open,
    Committed,
    RolledBack,
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleState::Open => write!(f, "OPEN"),
            HandleState::Committed => write!(f, "COMMITTED"),
            HandleState::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

/// One row opened for mutation inside its own store transaction
///
/// Changes made with [`RowHandle::apply`] stay in memory until
/// [`RowHandle::commit`]. A handle dropped while still open rolls back
/// synchronously when the store allows it, and otherwise schedules the
/// rollback on the current tokio runtime.
pub struct RowHandle<S: Store> {
    store: Arc<S>,
    txn: TransactionId,
    entity_id: EntityId,
    current: Row,
    original: Row,
    locked: Option<LockMode>,
    dirty: bool,
    state: HandleState,
}

impl<S: Store> RowHandle<S> {
    /// Begin a transaction and read the row without locking it
    ///
    /// # Errors
    /// `DbError::NotFound` if no such row exists; the transaction is rolled
    /// back before returning.
    pub async fn open(store: Arc<S>, entity_id: EntityId) -> Result<Self> {
        let txn = store.begin_transaction().await?;

        let row = match store.select_plain(txn, &entity_id).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                store.rollback(txn).await?;
                return Err(DbError::NotFound(entity_id));
            }
            Err(err) => {
                if let Err(rollback_err) = store.rollback(txn).await {
                    warn!(%txn, error = %rollback_err, "Rollback after failed open");
                }
                return Err(err);
            }
        };

        debug!(%txn, entity = %entity_id, version = row.version, "Row handle opened");
        Ok(Self {
            store,
            txn,
            entity_id,
            original: row.clone(),
            current: row,
            locked: None,
            dirty: false,
            state: HandleState::Open,
        })
    }

    pub fn txn(&self) -> TransactionId {
        self.txn
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == HandleState::Open
    }

    /// Current row, including changes applied but not yet committed
    pub fn read(&self) -> &Row {
        &self.current
    }

    /// Row as last read from the store
    pub fn original(&self) -> &Row {
        &self.original
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn lock_mode(&self) -> Option<LockMode> {
        self.locked
    }

    /// Take the row lock and re-read the row under it
    ///
    /// BLOCKING suspends until the holder finishes. The other modes report
    /// contention as `Unavailable` or `Skipped` without waiting.
    pub async fn lock(&mut self, mode: LockMode) -> Result<LockAcquisition> {
        self.ensure_open()?;
        if self.dirty {
            return Err(DbError::InvalidRequest(format!(
                "row {} must be locked before changes are applied",
                self.entity_id
            )));
        }

        match self
            .store
            .select_for_update(self.txn, &self.entity_id, mode)
            .await
        {
            Ok(Some(row)) => {
                self.original = row.clone();
                self.current = row.clone();
                self.locked = Some(mode);
                Ok(LockAcquisition::Acquired(row))
            }
            Ok(None) if mode == LockMode::SkipLocked => Ok(LockAcquisition::Skipped),
            Ok(None) => Err(DbError::NotFound(self.entity_id.clone())),
            Err(err) if err.is_lock_not_available() => Ok(LockAcquisition::Unavailable),
            Err(err) => Err(err),
        }
    }

    /// Run `mutation` against the current row, in memory only
    pub fn apply(&mut self, mutation: &Mutation) -> Result<&Row> {
        self.ensure_open()?;
        self.current.attributes = mutation.apply(&self.current)?;
        self.dirty = true;
        Ok(&self.current)
    }

    /// Write the pending attributes and commit
    ///
    /// On any failure the transaction is rolled back and the handle closed.
    pub async fn commit(&mut self) -> Result<Row> {
        self.ensure_open()?;

        if self.dirty
            && let Err(err) = self
                .store
                .update(self.txn, &self.entity_id, self.current.attributes.clone())
                .await
        {
            self.rollback().await?;
            return Err(err);
        }

        match self.store.commit(self.txn).await {
            Ok(info) => {
                if let Some(version) = info.version_of(&self.entity_id) {
                    self.current.version = version;
                }
                self.original = self.current.clone();
                self.dirty = false;
                self.state = HandleState::Committed;
                debug!(txn = %self.txn, entity = %self.entity_id, version = self.current.version, "Row committed");
                Ok(self.current.clone())
            }
            Err(err) => {
                self.rollback().await?;
                Err(err)
            }
        }
    }

    /// Discard all changes and end the transaction. No-op once closed.
    ///
    /// The handle stays open until the store has finished the rollback, so
    /// a caller cancelled mid-rollback still leaves the cleanup to `Drop`.
    pub async fn rollback(&mut self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }

        let result = self.store.rollback(self.txn).await;
        self.state = HandleState::RolledBack;
        self.current = self.original.clone();
        self.dirty = false;
        result
    }

    fn ensure_open(&self) -> Result<()> {
        if !self.is_open() {
            return Err(DbError::TransactionClosed(
                self.txn.to_string(),
                self.state.to_string(),
            ));
        }
        Ok(())
    }
}

impl<S: Store> fmt::Debug for RowHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowHandle")
            .field("txn", &self.txn)
            .field("entity_id", &self.entity_id)
            .field("current", &self.current)
            .field("locked", &self.locked)
            .field("dirty", &self.dirty)
            .field("state", &self.state)
            .finish()
    }
}

impl<S: Store> Drop for RowHandle<S> {
    fn drop(&mut self) {
        if !self.is_open() {
            return;
        }

        let txn = self.txn;
        if self.store.try_abort(txn) {
            debug!(%txn, entity = %self.entity_id, "Row handle dropped while open, rolled back");
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(%txn, entity = %self.entity_id, "Row handle dropped while open, rolling back");
                let store = Arc::clone(&self.store);
                runtime.spawn(async move {
                    if let Err(err) = store.rollback(txn).await {
                        warn!(%txn, error = %err, "Background rollback failed");
                    }
                });
            }
            Err(_) => {
                warn!(
                    %txn,
                    entity = %self.entity_id,
                    "Row handle dropped outside a tokio runtime; transaction left open"
                );
            }
        }
    }
}

use crate::core::{Attributes, EntityId, Row};
use crate::transaction::TransactionId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Owner of a row lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockHolder {
    pub txn: TransactionId,
    pub since: Instant,
}

impl LockHolder {
    pub fn held_for(&self) -> Duration {
        self.since.elapsed()
    }
}

/// Committed row plus its lock slot
#[derive(Debug)]
struct StoredRow {
    row: Row,
    holder: Option<LockHolder>,
    /// Signalled every time the lock is released
    released: Arc<Notify>,
}

/// Result of probing a row lock
#[derive(Debug)]
pub(crate) enum LockProbe {
    /// Lock now (or already) held by the caller
    Granted,
    /// Held by another transaction; `released` fires when it lets go
    Held {
        holder: LockHolder,
        released: Arc<Notify>,
    },
    /// No committed row with this id
    Missing,
}

/// Committed rows keyed by primary key, each with a row-level lock slot
#[derive(Debug, Default)]
pub struct RowTable {
    rows: HashMap<EntityId, StoredRow>,
}

impl RowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &EntityId) -> Option<&Row> {
        self.rows.get(id).map(|stored| &stored.row)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.rows.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Insert a new committed row at version 1
    pub fn insert(&mut self, id: EntityId, attributes: Attributes) -> u64 {
        let row = Row::new(id.clone(), 1, attributes);
        self.rows.insert(
            id,
            StoredRow {
                row,
                holder: None,
                released: Arc::new(Notify::new()),
            },
        );
        1
    }

    /// Replace the attributes of a committed row, returning its new version
    pub fn update(&mut self, id: &EntityId, attributes: Attributes) -> Option<u64> {
        let stored = self.rows.get_mut(id)?;
        stored.row.version += 1;
        stored.row.attributes = attributes;
        Some(stored.row.version)
    }

    pub fn lock_holder(&self, id: &EntityId) -> Option<LockHolder> {
        self.rows.get(id).and_then(|stored| stored.holder)
    }

    /// Take the lock for `txn` if it is free; re-entrant for the holder
    pub(crate) fn try_lock(&mut self, id: &EntityId, txn: TransactionId) -> LockProbe {
        let Some(stored) = self.rows.get_mut(id) else {
            return LockProbe::Missing;
        };

        match stored.holder {
            None => {
                stored.holder = Some(LockHolder {
                    txn,
                    since: Instant::now(),
                });
                LockProbe::Granted
            }
            Some(holder) if holder.txn == txn => LockProbe::Granted,
            Some(holder) => LockProbe::Held {
                holder,
                released: Arc::clone(&stored.released),
            },
        }
    }

    /// Release the lock on `id` if `txn` holds it and wake every waiter
    pub fn unlock(&mut self, id: &EntityId, txn: TransactionId) -> bool {
        match self.rows.get_mut(id) {
            Some(stored) if stored.holder.map(|h| h.txn) == Some(txn) => {
                stored.holder = None;
                stored.released.notify_waiters();
                true
            }
            _ => false,
        }
    }

    /// Number of rows currently locked
    pub fn locked_count(&self) -> usize {
        self.rows
            .values()
            .filter(|stored| stored.holder.is_some())
            .count()
    }
}

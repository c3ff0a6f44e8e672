#![allow(dead_code)]

use async_trait::async_trait;
use rowlock::storage::CommitInfo;
use rowlock::{
    Attributes, DbError, EntityId, InMemoryStore, LockMode, Mutation, Precondition, Result, Row,
    Store, StoreConfig, TransactionId, Value, attributes,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const TICKET_ID: i64 = 15;
pub const AVAILABLE: &str = "AVAILABLE";
pub const SOLD: &str = "SOLD";

pub fn ticket_id() -> EntityId {
    EntityId::Int(TICKET_ID)
}

pub fn ticket_attributes() -> Attributes {
    attributes([
        ("seat_number", Value::from("A15")),
        ("event_name", Value::from("Concert")),
        ("price", Value::from(99.99)),
        ("status", Value::from(AVAILABLE)),
    ])
}

pub fn hero_attributes() -> Attributes {
    attributes([
        ("name", Value::from("Spider-Man")),
        ("secret_name", Value::from("Peter Parker")),
        ("age", Value::Integer(25)),
    ])
}

pub async fn ticket_store(config: StoreConfig) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new(config).unwrap());
    store.seed(TICKET_ID, ticket_attributes()).await.unwrap();
    store
}

pub async fn hero_store(config: StoreConfig) -> (Arc<InMemoryStore>, EntityId) {
    let store = Arc::new(InMemoryStore::new(config).unwrap());
    let hero = store
        .seed(EntityId::new_v7(), hero_attributes())
        .await
        .unwrap();
    (store, hero.id)
}

/// Mark the ticket sold to `customer`
pub fn book(customer: &str) -> Mutation {
    let customer = customer.to_string();
    Mutation::new(move |_| {
        Ok(attributes([
            ("status", Value::from(SOLD)),
            ("buyer", Value::from(customer.as_str())),
        ]))
    })
}

pub fn is_available() -> Precondition {
    Precondition::field_equals("status", AVAILABLE)
}

/// Store wrapper whose first `failures` commits are refused with a conflict
pub struct FailingCommitStore {
    inner: InMemoryStore,
    failures: AtomicUsize,
}

impl FailingCommitStore {
    pub async fn with_ticket(failures: usize) -> Arc<Self> {
        let inner = InMemoryStore::default();
        inner.seed(TICKET_ID, ticket_attributes()).await.unwrap();
        Arc::new(Self {
            inner,
            failures: AtomicUsize::new(failures),
        })
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Store for FailingCommitStore {
    async fn begin_transaction(&self) -> Result<TransactionId> {
        self.inner.begin_transaction().await
    }

    async fn select_for_update(
        &self,
        txn: TransactionId,
        id: &EntityId,
        mode: LockMode,
    ) -> Result<Option<Row>> {
        self.inner.select_for_update(txn, id, mode).await
    }

    async fn select_plain(&self, txn: TransactionId, id: &EntityId) -> Result<Option<Row>> {
        self.inner.select_plain(txn, id).await
    }

    async fn insert(&self, txn: TransactionId, id: EntityId, attributes: Attributes) -> Result<()> {
        self.inner.insert(txn, id, attributes).await
    }

    async fn update(&self, txn: TransactionId, id: &EntityId, attributes: Attributes) -> Result<()> {
        self.inner.update(txn, id, attributes).await
    }

    async fn commit(&self, txn: TransactionId) -> Result<CommitInfo> {
        if self.take_failure() {
            self.inner.rollback(txn).await?;
            return Err(DbError::Conflict("injected commit failure".to_string()));
        }
        self.inner.commit(txn).await
    }

    async fn rollback(&self, txn: TransactionId) -> Result<()> {
        self.inner.rollback(txn).await
    }
}

/// Store wrapper whose rollbacks take `delay` before reaching the store
///
/// It has no synchronous abort path, so dropped handles fall back to a
/// background rollback.
pub struct SlowRollbackStore {
    inner: InMemoryStore,
    delay: Duration,
}

impl SlowRollbackStore {
    pub async fn with_sold_ticket(delay: Duration) -> Arc<Self> {
        let inner = InMemoryStore::default();
        let mut sold = ticket_attributes();
        sold.insert("status".to_string(), Value::from(SOLD));
        inner.seed(TICKET_ID, sold).await.unwrap();
        Arc::new(Self { inner, delay })
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }
}

#[async_trait]
impl Store for SlowRollbackStore {
    async fn begin_transaction(&self) -> Result<TransactionId> {
        self.inner.begin_transaction().await
    }

    async fn select_for_update(
        &self,
        txn: TransactionId,
        id: &EntityId,
        mode: LockMode,
    ) -> Result<Option<Row>> {
        self.inner.select_for_update(txn, id, mode).await
    }

    async fn select_plain(&self, txn: TransactionId, id: &EntityId) -> Result<Option<Row>> {
        self.inner.select_plain(txn, id).await
    }

    async fn insert(&self, txn: TransactionId, id: EntityId, attributes: Attributes) -> Result<()> {
        self.inner.insert(txn, id, attributes).await
    }

    async fn update(&self, txn: TransactionId, id: &EntityId, attributes: Attributes) -> Result<()> {
        self.inner.update(txn, id, attributes).await
    }

    async fn commit(&self, txn: TransactionId) -> Result<CommitInfo> {
        self.inner.commit(txn).await
    }

    async fn rollback(&self, txn: TransactionId) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.rollback(txn).await
    }
}

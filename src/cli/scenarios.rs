use anyhow::{Context, Result};
use chrono::Utc;
use rowlock::storage::StoreStats;
use rowlock::{
    Attempt, Attributes, EntityId, InMemoryStore, IsolationLevel, LockMode, Mutation,
    MutationCoordinator, Precondition, Row, SessionReport, SessionRunner, Store, StoreConfig,
    Value, attributes,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const AVAILABLE: &str = "AVAILABLE";
const SOLD: &str = "SOLD";
const CUSTOMERS: [&str; 3] = ["Alice", "Bob", "Charlie"];
const HERO_AGES: [i64; 3] = [26, 27, 30];

pub struct ScenarioOptions {
    pub attempts: usize,
    pub delay: Duration,
    pub isolation: IsolationLevel,
}

/// One round: every caller raced once against a freshly reset row
#[derive(Serialize)]
pub struct ScenarioResult {
    pub title: String,
    pub lock_mode: Option<LockMode>,
    pub report: SessionReport,
    pub final_row: Row,
    pub summary: String,
    pub stats: StoreStats,
}

fn describe(mode: Option<LockMode>) -> String {
    match mode {
        None => "WITHOUT LOCK (lost update risk)".to_string(),
        Some(mode) => format!("{} ({})", mode.sql_clause(), mode),
    }
}

fn customer(index: usize) -> String {
    CUSTOMERS
        .get(index)
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("Customer-{}", index + 1))
}

fn ticket_attributes() -> Attributes {
    attributes([
        ("seat_number", Value::from("A15")),
        ("event_name", Value::from("Concert")),
        ("price", Value::from(99.99)),
        ("status", Value::from(AVAILABLE)),
    ])
}

fn hero_attributes() -> Attributes {
    attributes([
        ("name", Value::from("Spider-Man")),
        ("secret_name", Value::from("Peter Parker")),
        ("age", Value::Integer(25)),
    ])
}

fn book(customer: String) -> Mutation {
    Mutation::new(move |_| {
        Ok(attributes([
            ("status", Value::from(SOLD)),
            ("buyer", Value::from(customer.as_str())),
            ("sold_at", Value::from(Utc::now().to_rfc3339())),
        ]))
    })
}

/// Put the row back to its starting state in its own transaction
async fn reset(store: &InMemoryStore, id: &EntityId, attributes: Attributes) -> Result<()> {
    let txn = store.begin_transaction().await?;
    store.update(txn, id, attributes).await?;
    store
        .commit(txn)
        .await
        .with_context(|| format!("failed to reset entity {}", id))?;
    Ok(())
}

fn new_store(options: &ScenarioOptions) -> Result<Arc<InMemoryStore>> {
    let store = InMemoryStore::new(StoreConfig::new().isolation(options.isolation))?;
    Ok(Arc::new(store))
}

pub async fn tickets(options: &ScenarioOptions) -> Result<Vec<ScenarioResult>> {
    let store = new_store(options)?;
    let ticket = store
        .seed(15, ticket_attributes())
        .await
        .context("failed to seed ticket")?;
    let runner = SessionRunner::new(MutationCoordinator::new(Arc::clone(&store)));

    let mut results = Vec::new();
    for mode in [None, Some(LockMode::Blocking), Some(LockMode::NoWait)] {
        reset(&store, &ticket.id, ticket_attributes()).await?;

        let attempts = (0..options.attempts)
            .map(|index| {
                let name = customer(index);
                Attempt::new(name.clone(), mode, book(name))
                    .precondition(Precondition::field_equals("status", AVAILABLE))
                    .processing_delay(options.delay)
            })
            .collect();

        let report = runner.run(&ticket.id, attempts).await?;
        let final_row = store
            .fetch(&ticket.id)
            .await
            .context("ticket disappeared")?;
        let summary = format!(
            "status={} buyer={} version={}",
            final_row.get_str("status").unwrap_or("?"),
            final_row.get_str("buyer").unwrap_or("-"),
            final_row.version
        );
        info!(scenario = "tickets", mode = %describe(mode), %summary, "Round finished");

        results.push(ScenarioResult {
            title: format!("Tickets: {}", describe(mode)),
            lock_mode: mode,
            report,
            final_row,
            summary,
            stats: store.stats().await,
        });
    }
    Ok(results)
}

pub async fn heroes(options: &ScenarioOptions) -> Result<Vec<ScenarioResult>> {
    let store = new_store(options)?;
    let hero = store
        .seed(EntityId::new_v7(), hero_attributes())
        .await
        .context("failed to seed hero")?;
    let runner = SessionRunner::new(MutationCoordinator::new(Arc::clone(&store)));

    let mut results = Vec::new();
    for mode in [
        None,
        Some(LockMode::Blocking),
        Some(LockMode::NoWait),
        Some(LockMode::SkipLocked),
    ] {
        reset(&store, &hero.id, hero_attributes()).await?;

        let attempts = (0..options.attempts)
            .map(|index| {
                let age = HERO_AGES
                    .get(index)
                    .copied()
                    .unwrap_or(30 + index as i64);
                Attempt::new(format!("set-age-{}", age), mode, Mutation::set("age", age))
                    .processing_delay(options.delay)
            })
            .collect();

        let report = runner.run(&hero.id, attempts).await?;
        let final_row = store.fetch(&hero.id).await.context("hero disappeared")?;
        let summary = format!(
            "age={} version={}",
            final_row.get_i64("age").unwrap_or_default(),
            final_row.version
        );
        info!(scenario = "heroes", mode = %describe(mode), %summary, "Round finished");

        results.push(ScenarioResult {
            title: format!("Heroes: {}", describe(mode)),
            lock_mode: mode,
            report,
            final_row,
            summary,
            stats: store.stats().await,
        });
    }
    Ok(results)
}

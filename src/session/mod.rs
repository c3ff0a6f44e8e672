// ============================================================================
// Concurrent Session Runner
// ============================================================================
//
// Drives N labelled attempts against the same row at the same time. Every
// attempt runs in its own tokio task and goes through the mutation
// coordinator; a barrier releases them together so they genuinely race.
//
// ============================================================================

pub mod report;

pub use report::{AttemptReport, SessionReport};

use crate::coordinator::{Failure, LockRequest, Mutation, MutationCoordinator, Outcome, Precondition};
use crate::core::{DbError, EntityId, Result};
use crate::lock::LockMode;
use crate::storage::Store;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tracing::{info, warn};

/// One caller in a session
#[derive(Debug, Clone)]
pub struct Attempt {
    pub label: String,
    pub lock_mode: Option<LockMode>,
    pub mutation: Mutation,
    pub precondition: Option<Precondition>,
    pub timeout: Option<Duration>,
    pub processing_delay: Option<Duration>,
    /// Offset after the common start signal
    pub start_delay: Option<Duration>,
}

impl Attempt {
    pub fn new(label: impl Into<String>, lock_mode: Option<LockMode>, mutation: Mutation) -> Self {
        Self {
            label: label.into(),
            lock_mode,
            mutation,
            precondition: None,
            timeout: None,
            processing_delay: None,
            start_delay: None,
        }
    }

    pub fn precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = Some(precondition);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = Some(delay);
        self
    }

    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    fn request(&self, entity_id: &EntityId) -> LockRequest {
        LockRequest {
            entity_id: entity_id.clone(),
            lock_mode: self.lock_mode,
            timeout: self.timeout,
            precondition: self.precondition.clone(),
            mutation: self.mutation.clone(),
            processing_delay: self.processing_delay,
        }
    }
}

pub struct SessionRunner<S: Store> {
    coordinator: Arc<MutationCoordinator<S>>,
}

impl<S: Store> Clone for SessionRunner<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

impl<S: Store> SessionRunner<S> {
    pub fn new(coordinator: MutationCoordinator<S>) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
        }
    }

    pub fn from_shared(coordinator: Arc<MutationCoordinator<S>>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &MutationCoordinator<S> {
        &self.coordinator
    }

    /// Run every attempt concurrently against `entity_id` and wait for all
    ///
    /// # Errors
    /// `DbError::InvalidRequest` if two attempts share a label. Nothing runs
    /// in that case.
    pub async fn run(&self, entity_id: &EntityId, attempts: Vec<Attempt>) -> Result<SessionReport> {
        ensure_unique_labels(&attempts)?;

        let mut report = SessionReport::new(entity_id.clone());
        if attempts.is_empty() {
            return Ok(report);
        }

        info!(entity = %entity_id, attempts = attempts.len(), "Session started");
        let started = Instant::now();
        let barrier = Arc::new(Barrier::new(attempts.len()));

        let (labels, tasks): (Vec<_>, Vec<_>) = attempts
            .into_iter()
            .map(|attempt| {
                let coordinator = Arc::clone(&self.coordinator);
                let barrier = Arc::clone(&barrier);
                let request = attempt.request(entity_id);
                let start_delay = attempt.start_delay;

                let task = tokio::spawn(async move {
                    barrier.wait().await;
                    if let Some(delay) = start_delay {
                        tokio::time::sleep(delay).await;
                    }

                    let call_started = Instant::now();
                    let outcome = coordinator.execute(&request).await;
                    AttemptReport {
                        outcome,
                        elapsed: call_started.elapsed(),
                    }
                });
                (attempt.label, task)
            })
            .unzip();

        for (label, joined) in labels.into_iter().zip(join_all(tasks).await) {
            let attempt = match joined {
                Ok(attempt) => attempt,
                Err(err) => {
                    warn!(attempt = %label, error = %err, "Attempt task did not finish");
                    AttemptReport {
                        outcome: Outcome::failed(Failure::Unexpected(format!(
                            "attempt task failed: {}",
                            err
                        ))),
                        elapsed: Duration::ZERO,
                    }
                }
            };
            report.record(label, attempt);
        }

        info!(
            entity = %entity_id,
            committed = report.committed_labels().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Session finished"
        );
        Ok(report)
    }
}

fn ensure_unique_labels(attempts: &[Attempt]) -> Result<()> {
    let mut labels = BTreeSet::new();
    for attempt in attempts {
        if !labels.insert(attempt.label.as_str()) {
            return Err(DbError::InvalidRequest(format!(
                "duplicate attempt label '{}'",
                attempt.label
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::OutcomeKind;
    use crate::core::{Value, attributes};
    use crate::storage::InMemoryStore;

    async fn runner() -> SessionRunner<InMemoryStore> {
        let store = Arc::new(InMemoryStore::default());
        store
            .seed(1, attributes([("age", Value::Integer(25))]))
            .await
            .unwrap();
        SessionRunner::new(MutationCoordinator::new(store))
    }

    #[tokio::test]
    async fn test_duplicate_labels_rejected() {
        let runner = runner().await;
        let attempts = vec![
            Attempt::new("worker", None, Mutation::increment("age", 1)),
            Attempt::new("worker", None, Mutation::increment("age", 1)),
        ];

        let err = runner.run(&EntityId::Int(1), attempts).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidRequest(msg) if msg.contains("worker")));
        let row = runner.coordinator().store().fetch(&EntityId::Int(1)).await.unwrap();
        assert_eq!(row.version, 1);
    }

    #[tokio::test]
    async fn test_empty_session() {
        let report = runner().await.run(&EntityId::Int(1), Vec::new()).await.unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_blocking_increments_all_apply() {
        let runner = runner().await;
        let attempts = (0..4)
            .map(|i| {
                Attempt::new(
                    format!("worker-{}", i),
                    Some(LockMode::Blocking),
                    Mutation::increment("age", 1),
                )
            })
            .collect();

        let report = runner.run(&EntityId::Int(1), attempts).await.unwrap();
        assert_eq!(report.count(OutcomeKind::Committed), 4);

        let row = runner.coordinator().store().fetch(&EntityId::Int(1)).await.unwrap();
        assert_eq!(row.get_i64("age"), Some(29));
        assert_eq!(row.version, 5);
    }
}

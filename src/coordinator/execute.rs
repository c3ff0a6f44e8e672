use super::{Failure, LockRequest, Outcome, OutcomeKind, Rejection, RowHandle};
use crate::config::CoordinatorConfig;
use crate::core::{DbError, EntityId, Result};
use crate::lock::{LockAcquisition, LockMode};
use crate::storage::Store;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, Level, event, info_span};

/// Runs one mutation against one row under the requested lock strategy
/// and reports exactly one [`Outcome`].
pub struct MutationCoordinator<S: Store> {
    store: Arc<S>,
    config: CoordinatorConfig,
}

impl<S: Store> Clone for MutationCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: Store> MutationCoordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            config: CoordinatorConfig::default(),
        }
    }

    pub fn with_config(store: Arc<S>, config: CoordinatorConfig) -> Result<Self> {
        config.validate().map_err(DbError::Config)?;
        Ok(Self { store, config })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// open → lock → precondition → delay → mutate → commit
    ///
    /// Every exit other than `Committed` rolls the transaction back.
    pub async fn execute(&self, request: &LockRequest) -> Outcome {
        let span = info_span!(
            "coordinator.execute",
            entity = %request.entity_id,
            mode = ?request.lock_mode,
        );

        async {
            let outcome = self.run(request).await;
            match &outcome {
                Outcome::Committed { row } => {
                    event!(Level::DEBUG, version = row.version, "mutation committed")
                }
                Outcome::Failed {
                    failure: Failure::Unexpected(detail),
                } => event!(Level::ERROR, error = %detail, "mutation failed"),
                Outcome::Failed { failure } => {
                    event!(Level::WARN, %failure, "mutation not committed")
                }
                other => event!(Level::DEBUG, outcome = %other, "mutation not applied"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(&self, request: &LockRequest) -> Outcome {
        let mut handle =
            match RowHandle::open(Arc::clone(&self.store), request.entity_id.clone()).await {
                Ok(handle) => handle,
                Err(DbError::NotFound(_)) => return Outcome::NotFound,
                Err(err) => return Outcome::failed(Failure::Unexpected(err.to_string())),
            };

        if let Some(mode) = request.lock_mode {
            let acquisition = match self.wait_limit(request, mode) {
                Some(limit) => match tokio::time::timeout(limit, handle.lock(mode)).await {
                    Ok(acquisition) => acquisition,
                    Err(_) => {
                        event!(
                            Level::DEBUG,
                            wait_ms = limit.as_millis() as u64,
                            "row lock wait timed out"
                        );
                        return Self::abandon(&mut handle, Outcome::failed(Failure::Timeout))
                            .await;
                    }
                },
                None => handle.lock(mode).await,
            };

            let outcome = match acquisition {
                Ok(LockAcquisition::Acquired(_)) => None,
                Ok(LockAcquisition::Unavailable) => Some(Outcome::LockUnavailable),
                Ok(LockAcquisition::Skipped) => Some(Outcome::Skipped),
                Err(DbError::NotFound(_)) => Some(Outcome::NotFound),
                Err(err) => Some(Outcome::failed(Failure::Unexpected(err.to_string()))),
            };
            if let Some(outcome) = outcome {
                return Self::abandon(&mut handle, outcome).await;
            }
        }

        if let Some(precondition) = &request.precondition
            && !precondition.holds(handle.read())
        {
            let rejection = Rejection::PreconditionFailed(precondition.description().to_string());
            return Self::abandon(&mut handle, Outcome::rejected(rejection)).await;
        }

        if let Some(delay) = request.processing_delay {
            tokio::time::sleep(delay).await;
        }

        let applied =
            panic::catch_unwind(AssertUnwindSafe(|| handle.apply(&request.mutation).map(|_| ())));
        let error = match applied {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(payload) => Some(format!("mutation panicked: {}", panic_message(payload.as_ref()))),
        };
        if let Some(error) = error {
            let outcome = Outcome::failed(Failure::Unexpected(error));
            return Self::abandon(&mut handle, outcome).await;
        }

        match handle.commit().await {
            Ok(row) => Outcome::committed(row),
            Err(err) => Outcome::failed(Failure::from(err)),
        }
    }

    /// BLOCKING waits are bounded by the request timeout, then the default
    fn wait_limit(&self, request: &LockRequest, mode: LockMode) -> Option<Duration> {
        if !mode.may_suspend() {
            return None;
        }
        request.timeout.or(self.config.lock_timeout)
    }

    async fn abandon(handle: &mut RowHandle<S>, outcome: Outcome) -> Outcome {
        if let Err(err) = handle.rollback().await {
            event!(Level::WARN, txn = %handle.txn(), error = %err, "rollback failed");
        }
        outcome
    }

    /// Re-run conflicts (and timeouts, if enabled) with a fresh transaction
    /// per attempt until the retry policy is exhausted.
    pub async fn execute_with_retry(&self, request: &LockRequest) -> Outcome {
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            let outcome = self.execute(request).await;
            let retry = match outcome.failure() {
                Some(Failure::Timeout) => policy.retry_timeouts,
                Some(failure) => failure.is_retryable(),
                None => false,
            };

            if !retry || attempt >= max_attempts {
                return outcome;
            }

            event!(
                Level::INFO,
                entity = %request.entity_id,
                attempt,
                %outcome,
                "retrying mutation"
            );
            tokio::time::sleep(policy.backoff(attempt)).await;
            attempt += 1;
        }
    }

    /// Work stealing over candidate rows under SKIP_LOCKED
    ///
    /// Locked, missing and precondition-rejected candidates are passed over.
    /// Returns the first candidate with any other outcome, or `None` when
    /// every candidate was passed over.
    pub async fn claim_first_available<I>(
        &self,
        candidates: I,
        request: &LockRequest,
    ) -> Option<(EntityId, Outcome)>
    where
        I: IntoIterator<Item = EntityId>,
    {
        for id in candidates {
            let claim = request.for_entity(id.clone()).lock_mode(LockMode::SkipLocked);
            let outcome = self.execute(&claim).await;

            match outcome.kind() {
                OutcomeKind::Skipped | OutcomeKind::NotFound | OutcomeKind::Rejected => continue,
                _ => return Some((id, outcome)),
            }
        }
        None
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{Mutation, Precondition};
    use crate::core::{Value, attributes};
    use crate::storage::InMemoryStore;

    async fn coordinator() -> MutationCoordinator<InMemoryStore> {
        let store = Arc::new(InMemoryStore::default());
        store
            .seed(
                15,
                attributes([("seat", Value::from("A15")), ("status", Value::from("AVAILABLE"))]),
            )
            .await
            .unwrap();
        MutationCoordinator::new(store)
    }

    fn book() -> LockRequest {
        LockRequest::new(15, Mutation::set("status", "SOLD"))
            .precondition(Precondition::field_equals("status", "AVAILABLE"))
    }

    #[tokio::test]
    async fn test_execute_commits() {
        let coordinator = coordinator().await;
        let outcome = coordinator.execute(&book().lock_mode(LockMode::Blocking)).await;

        let row = outcome.committed_row().unwrap();
        assert_eq!(row.get_str("status"), Some("SOLD"));
        assert_eq!(row.version, 2);
    }

    #[tokio::test]
    async fn test_second_booking_is_rejected() {
        let coordinator = coordinator().await;
        assert!(coordinator.execute(&book()).await.is_committed());

        let outcome = coordinator.execute(&book()).await;
        assert_eq!(
            outcome,
            Outcome::rejected(Rejection::PreconditionFailed("status == AVAILABLE".into()))
        );
        assert_eq!(coordinator.store().stats().await.rollbacks, 1);
    }

    #[tokio::test]
    async fn test_missing_row() {
        let coordinator = coordinator().await;
        let request = LockRequest::new(99, Mutation::set("status", "SOLD"));
        assert_eq!(coordinator.execute(&request).await, Outcome::NotFound);
        assert_eq!(
            coordinator
                .execute(&request.lock_mode(LockMode::NoWait))
                .await,
            Outcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_mutation_error_rolls_back() {
        let coordinator = coordinator().await;
        let request = LockRequest::new(15, Mutation::increment("status", 1))
            .lock_mode(LockMode::Blocking);

        let outcome = coordinator.execute(&request).await;
        assert!(matches!(
            outcome.failure(),
            Some(Failure::Unexpected(detail)) if detail.contains("Type mismatch")
        ));

        let stats = coordinator.store().stats().await;
        assert_eq!(stats.held_locks, 0);
        assert_eq!(stats.active_transactions, 0);
    }

    #[tokio::test]
    async fn test_panicking_mutation_fails_and_releases_row() {
        let coordinator = coordinator().await;
        let request = LockRequest::new(15, Mutation::new(|_| panic!("seat map exploded")))
            .lock_mode(LockMode::Blocking);

        let outcome = coordinator.execute(&request).await;
        assert!(matches!(
            outcome.failure(),
            Some(Failure::Unexpected(detail)) if detail.contains("seat map exploded")
        ));

        let stats = coordinator.store().stats().await;
        assert_eq!(stats.held_locks, 0);
        assert_eq!(stats.active_transactions, 0);
        assert!(coordinator.execute(&book()).await.is_committed());
    }

    #[test]
    fn test_with_config_validates() {
        let store = Arc::new(InMemoryStore::default());
        let config = CoordinatorConfig::new().lock_timeout(Duration::ZERO);
        assert!(matches!(
            MutationCoordinator::with_config(store, config),
            Err(DbError::Config(_))
        ));
    }
}

use crate::core::{Attributes, EntityId, Result, Row, Value};
use crate::lock::LockMode;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type MutationFn = dyn Fn(&Row) -> Result<Attributes> + Send + Sync;
type CheckFn = dyn Fn(&Row) -> bool + Send + Sync;

/// Computes the new attributes of a row from its current state.
///
/// The returned map is merged over the current attributes, so a mutation
/// only names the attributes it changes.
#[derive(Clone)]
pub struct Mutation(Arc<MutationFn>);

impl Mutation {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Row) -> Result<Attributes> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Set one attribute to a fixed value
    pub fn set(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        Self::new(move |_| {
            let mut changes = Attributes::new();
            changes.insert(name.clone(), value.clone());
            Ok(changes)
        })
    }

    /// Add `delta` to an integer attribute
    pub fn increment(name: impl Into<String>, delta: i64) -> Self {
        let name = name.into();
        Self::new(move |row| {
            let current = row.get(&name).cloned().unwrap_or(Value::Integer(0));
            let mut changes = Attributes::new();
            changes.insert(name.clone(), current.checked_add(delta)?);
            Ok(changes)
        })
    }

    /// Apply to `row`, returning the full attribute map after the change
    pub fn apply(&self, row: &Row) -> Result<Attributes> {
        let changes = (self.0)(row)?;
        let mut attributes = row.attributes.clone();
        attributes.extend(changes);
        Ok(attributes)
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Mutation(..)")
    }
}

/// A state check that must hold before the mutation runs
#[derive(Clone)]
pub struct Precondition {
    description: String,
    check: Arc<CheckFn>,
}

impl Precondition {
    pub fn new<F>(description: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Row) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            check: Arc::new(check),
        }
    }

    /// `row[name] == value`
    pub fn field_equals(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        let description = format!("{} == {}", name, value);
        Self::new(description, move |row| row.get(&name) == Some(&value))
    }

    /// Optimistic check against the version the caller last saw
    pub fn version_equals(version: u64) -> Self {
        Self::new(format!("version == {}", version), move |row| {
            row.version == version
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn holds(&self, row: &Row) -> bool {
        (self.check)(row)
    }
}

impl fmt::Debug for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Precondition")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// One coordinated mutation of one row
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub entity_id: EntityId,
    /// `None` reads without a row lock
    pub lock_mode: Option<LockMode>,
    /// BLOCKING wait limit; falls back to the coordinator default
    pub timeout: Option<Duration>,
    pub precondition: Option<Precondition>,
    pub mutation: Mutation,
    /// Work simulated between the read and the write
    pub processing_delay: Option<Duration>,
}

impl LockRequest {
    pub fn new(entity_id: impl Into<EntityId>, mutation: Mutation) -> Self {
        Self {
            entity_id: entity_id.into(),
            lock_mode: None,
            timeout: None,
            precondition: None,
            mutation,
            processing_delay: None,
        }
    }

    pub fn lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_mode = Some(mode);
        self
    }

    pub fn maybe_lock_mode(mut self, mode: Option<LockMode>) -> Self {
        self.lock_mode = mode;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = Some(precondition);
        self
    }

    pub fn processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = Some(delay);
        self
    }

    /// Same request against another row
    pub fn for_entity(&self, entity_id: EntityId) -> Self {
        Self {
            entity_id,
            ..self.clone()
        }
    }
}

use super::Value;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Attribute map of a row, ordered by attribute name.
pub type Attributes = BTreeMap<String, Value>;

/// Primary key of a row. Immutable once the row exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum EntityId {
    Int(i64),
    Uuid(Uuid),
}

impl EntityId {
    /// Time-ordered UUID key.
    pub fn new_v7() -> Self {
        Self::Uuid(Uuid::now_v7())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{}", id),
            Self::Uuid(id) => write!(f, "{}", id),
        }
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<i32> for EntityId {
    fn from(id: i32) -> Self {
        Self::Int(i64::from(id))
    }
}

impl From<Uuid> for EntityId {
    fn from(id: Uuid) -> Self {
        Self::Uuid(id)
    }
}

/// One row as seen by a transaction.
///
/// `version` is assigned by the store: 1 on insert, incremented on every
/// committed update. A row that only exists as a pending insert of the
/// reading transaction has version 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub id: EntityId,
    pub version: u64,
    pub attributes: Attributes,
}

impl Row {
    pub fn new(id: EntityId, version: u64, attributes: Attributes) -> Self {
        Self {
            id,
            version,
            attributes,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }
}

/// Builds an attribute map from `(name, value)` pairs.
pub fn attributes<I, K, V>(pairs: I) -> Attributes
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(name, value)| (name.into(), value.into()))
        .collect()
}

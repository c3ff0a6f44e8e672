// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Writes are buffered per transaction and only reach the row table on
// COMMIT. ROLLBACK simply discards the buffer.
//
// ============================================================================

use crate::core::{Attributes, EntityId};

/// A pending write recorded by a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Create a new row
    InsertRow { id: EntityId, attributes: Attributes },

    /// Replace the attributes of an existing row
    UpdateRow { id: EntityId, attributes: Attributes },
}

impl Change {
    /// Get the entity affected by this change
    pub fn entity_id(&self) -> &EntityId {
        match self {
            Change::InsertRow { id, .. } => id,
            Change::UpdateRow { id, .. } => id,
        }
    }

    /// Attributes the row will carry once this change is applied
    pub fn attributes(&self) -> &Attributes {
        match self {
            Change::InsertRow { attributes, .. } => attributes,
            Change::UpdateRow { attributes, .. } => attributes,
        }
    }

    pub(crate) fn replace_attributes(&mut self, new_attributes: Attributes) {
        match self {
            Change::InsertRow { attributes, .. } | Change::UpdateRow { attributes, .. } => {
                *attributes = new_attributes
            }
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Change::InsertRow { .. })
    }
}

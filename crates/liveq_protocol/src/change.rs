//! Change records produced by repository mutations.

use crate::id::ItemId;
use serde::{Deserialize, Serialize};

/// The kind of a repository mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// A row was inserted (no previous version existed).
    Insert,
    /// A row was updated (previous version existed).
    Update,
    /// A row was deleted.
    Delete,
}

/// A single mutation outcome, emitted once per mutated row.
///
/// Records are produced only after the underlying write succeeded.
/// Updates always carry `old_id`, the row's identifier before the
/// update. It equals `id` unless the identifier field itself changed,
/// in which case the diff treats the pair as a rename rather than a
/// remove followed by an add.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Identifier of the row after the mutation.
    pub id: ItemId,
    /// Identifier of the row before the mutation, for updates.
    #[serde(rename = "oldId", skip_serializing_if = "Option::is_none")]
    pub old_id: Option<ItemId>,
    /// Kind of mutation.
    pub kind: ChangeKind,
}

impl ChangeRecord {
    /// Creates an insert record.
    pub fn insert(id: ItemId) -> Self {
        Self {
            id,
            old_id: None,
            kind: ChangeKind::Insert,
        }
    }

    /// Creates an update record carrying the previous identifier.
    pub fn update(id: ItemId, old_id: ItemId) -> Self {
        Self {
            id,
            old_id: Some(old_id),
            kind: ChangeKind::Update,
        }
    }

    /// Creates a delete record.
    pub fn delete(id: ItemId) -> Self {
        Self {
            id,
            old_id: None,
            kind: ChangeKind::Delete,
        }
    }

    /// Returns true if the mutation changed the row's identifier.
    pub fn renamed(&self) -> bool {
        matches!(&self.old_id, Some(old) if *old != self.id)
    }
}

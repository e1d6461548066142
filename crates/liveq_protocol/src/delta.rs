//! Live query delta variants.

use crate::id::ItemId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single delta applied to a client's materialized query result.
///
/// Deltas travel in ordered batches; consumers apply each batch in
/// sequence. An `add` or `replace` for an id the consumer does not hold
/// is treated as an upsert.
///
/// Wire shape is `{ "type": ..., "data": ... }`:
///
/// ```json
/// { "type": "replace", "data": { "oldId": 1, "item": { "id": 1 } } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum LiveQueryChange {
    /// Full row set replacing the client state.
    All(Vec<Value>),
    /// A row entered the result set.
    Add {
        /// The new row.
        item: Value,
    },
    /// A row changed, possibly including its identifier.
    Replace {
        /// Identifier the consumer currently holds for the row.
        #[serde(rename = "oldId")]
        old_id: ItemId,
        /// The replacement row.
        item: Value,
    },
    /// A row left the result set.
    Remove {
        /// Identifier of the removed row.
        id: ItemId,
    },
}

impl LiveQueryChange {
    /// Returns true if applying this delta can change result ordering.
    pub fn affects_order(&self) -> bool {
        matches!(
            self,
            LiveQueryChange::Add { .. } | LiveQueryChange::Replace { .. }
        )
    }
}

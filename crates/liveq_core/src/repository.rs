//! Repository traits bridging the live query machinery to storage.

use crate::error::CoreResult;
use crate::find::FindOptions;
use liveq_protocol::ItemId;
use serde_json::Value;
use std::sync::Arc;

/// Identifier access for one entity type.
///
/// Rows are API-JSON objects; the metadata knows which field carries
/// the identifier and how to read it. The client subscriber needs only
/// this trait, not a full repository.
pub trait EntityMeta: Send + Sync {
    /// Stable string identifying the entity type across client and server.
    fn entity_key(&self) -> &str;

    /// Extracts the identifier from a row.
    fn row_id(&self, row: &Value) -> CoreResult<ItemId>;
}

/// A queryable repository over one entity type.
///
/// Implementations wrap concrete storage (SQL, document store, memory)
/// and are bound to a caller context at construction time. Mutating
/// implementations report committed changes through a
/// [`ChangeNotifier`](crate::ChangeNotifier).
pub trait Repository: EntityMeta {
    /// Runs the filter/sort/pagination and returns matching rows in
    /// result order.
    fn find(&self, options: &FindOptions) -> CoreResult<Vec<Value>>;
}

/// Resolves repositories for background re-evaluation.
///
/// Given an entity key and a serialized request context, an
/// implementation reconstructs a repository bound to the original
/// caller's identity. The live query publisher uses this to re-run
/// stored queries when entities change.
pub trait RepositoryProvider: Send + Sync {
    /// Returns a repository for the entity, bound to the given context.
    fn resolve(&self, entity_key: &str, request_json: &Value) -> CoreResult<Arc<dyn Repository>>;
}

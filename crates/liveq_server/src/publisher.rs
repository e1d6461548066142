//! Live query re-evaluation and delta broadcast.

use crate::error::ServerResult;
use crate::storage::{LiveQueryStorage, StoredQuery};
use liveq_core::{ChangesListener, FindOptions, MessagePublisher, RepositoryProvider};
use liveq_protocol::{ChangeRecord, ItemId, LiveQueryChange};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Re-evaluates stored queries on entity changes and broadcasts deltas.
///
/// Registered as the change listener of the repositories' notifier.
/// Each change batch triggers, per stored query of the mutated entity:
/// a re-run of the original filter under the original caller's context,
/// a diff of the previous ids against the current ones, and a broadcast
/// of the resulting delta batch on the channel keyed by the query id.
///
/// The diff folds identifier-changing updates into a single `replace`
/// instead of a `remove` followed by an `add`.
pub struct LiveQueryPublisher {
    storage: Arc<dyn LiveQueryStorage>,
    repositories: Arc<dyn RepositoryProvider>,
    bus: Arc<dyn MessagePublisher>,
    entity_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LiveQueryPublisher {
    /// Creates a publisher over the given storage, repositories and
    /// broadcast seam.
    pub fn new(
        storage: Arc<dyn LiveQueryStorage>,
        repositories: Arc<dyn RepositoryProvider>,
        bus: Arc<dyn MessagePublisher>,
    ) -> Self {
        Self {
            storage,
            repositories,
            bus,
            entity_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the serialization lock for one entity key.
    ///
    /// Changes for one key are fanned out fully before the next batch
    /// for that key starts; different keys proceed independently.
    fn entity_lock(&self, entity_key: &str) -> Arc<Mutex<()>> {
        self.entity_locks
            .lock()
            .entry(entity_key.to_string())
            .or_default()
            .clone()
    }

    /// Re-runs one stored query and diffs its previous id set against
    /// the current result.
    ///
    /// Returns the current ids (to persist as the query's new state)
    /// and the delta batch to broadcast.
    fn evaluate(
        &self,
        query: &StoredQuery,
        changes: &[ChangeRecord],
    ) -> ServerResult<(Vec<ItemId>, Vec<LiveQueryChange>)> {
        let repository = self
            .repositories
            .resolve(&query.entity_key, &query.request_json)?;
        let options = FindOptions::from_json(&query.find_options_json)?;

        let current_items = repository.find(&options)?;
        let mut current_ids = Vec::with_capacity(current_items.len());
        for item in &current_items {
            current_ids.push(repository.row_id(item)?);
        }

        let mut deltas = Vec::new();

        // Removal pass: previous ids that disappeared, unless a change
        // record explains the disappearance as a rename whose new id is
        // still in the result.
        for id in query.last_ids.iter().filter(|id| !current_ids.contains(id)) {
            let renamed = changes
                .iter()
                .any(|c| c.old_id.as_ref() == Some(id) && current_ids.contains(&c.id));
            if !renamed {
                deltas.push(LiveQueryChange::Remove { id: id.clone() });
            }
        }

        // Add/replace pass over the current result, in result order.
        for (item, id) in current_items.iter().zip(&current_ids) {
            let mut replaced = false;
            if let Some(change) = changes.iter().find(|c| c.id == *id) {
                if let Some(old_id) = &change.old_id {
                    if query.last_ids.contains(old_id) {
                        deltas.push(LiveQueryChange::Replace {
                            old_id: old_id.clone(),
                            item: item.clone(),
                        });
                        replaced = true;
                    }
                }
            }
            if !replaced && !query.last_ids.contains(id) {
                deltas.push(LiveQueryChange::Add { item: item.clone() });
            }
        }

        Ok((current_ids, deltas))
    }

    fn broadcast(&self, query_id: &str, deltas: &[LiveQueryChange]) -> ServerResult<()> {
        // Empty batches are suppressed; the per-entity lock keeps
        // ordering intact regardless.
        if deltas.is_empty() {
            return Ok(());
        }
        let payload = serde_json::to_value(deltas).map_err(liveq_core::CoreError::from)?;
        self.bus.publish(query_id, &payload)?;
        Ok(())
    }
}

impl ChangesListener for LiveQueryPublisher {
    fn item_changed(&self, entity_key: &str, changes: &[ChangeRecord]) {
        let lock = self.entity_lock(entity_key);
        let _serialized = lock.lock();

        self.storage.provide_listeners(entity_key, &mut |query| {
            match self.evaluate(query, changes) {
                Ok((current_ids, deltas)) => {
                    if let Err(error) = self.broadcast(&query.id, &deltas) {
                        tracing::warn!(query = %query.id, %error, "delta broadcast failed");
                    }
                    Some(current_ids)
                }
                Err(error) => {
                    tracing::warn!(
                        query = %query.id,
                        %error,
                        "live query re-evaluation failed, skipping"
                    );
                    None
                }
            }
        });
    }
}

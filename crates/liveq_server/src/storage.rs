//! Server-side storage of active live queries.

use liveq_protocol::ItemId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

/// A registered live query.
///
/// Holds everything needed to re-run the query in the background: the
/// serialized filter/sort, the serialized caller context, and the id
/// set the query matched last time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredQuery {
    /// Server-generated unique id, also the broadcast channel key.
    pub id: String,
    /// Entity type the query runs over.
    pub entity_key: String,
    /// Serialized filter, sort and pagination.
    pub find_options_json: Value,
    /// Serialized caller context for re-evaluation.
    pub request_json: Value,
    /// Identifiers the query matched on its last evaluation, in result
    /// order.
    pub last_ids: Vec<ItemId>,
}

/// Persistence backend for active live queries.
///
/// The default implementation keeps queries in process memory; a
/// multi-process deployment can plug in a shared store since query
/// state must survive across requests and connections.
pub trait LiveQueryStorage: Send + Sync {
    /// Inserts a new query.
    ///
    /// The caller supplies a globally unique id; a collision is a
    /// caller error and is not handled defensively.
    fn store(&self, query: StoredQuery);

    /// Removes a query. Removing an unknown id is a no-op.
    fn remove(&self, id: &str);

    /// Refreshes the given ids and returns the subset the store does
    /// not recognize (the client must re-subscribe those).
    fn keep_alive_and_return_unknown_ids(&self, ids: &[String]) -> Vec<String>;

    /// Invokes `handle` once per stored query for the entity key, after
    /// evicting queries idle beyond the expiry window.
    ///
    /// The handler returns the re-evaluated id set to persist, or
    /// `None` to leave the stored ids untouched (failed evaluation).
    fn provide_listeners(
        &self,
        entity_key: &str,
        handle: &mut dyn FnMut(&StoredQuery) -> Option<Vec<ItemId>>,
    );
}

struct Entry {
    query: StoredQuery,
    last_used: Instant,
}

/// In-memory live query storage with idle expiry.
pub struct InMemoryLiveQueryStorage {
    entries: RwLock<Vec<Entry>>,
    idle_window: Duration,
}

impl InMemoryLiveQueryStorage {
    /// Default idle window after which queries without keep-alive expire.
    pub const DEFAULT_IDLE_WINDOW: Duration = Duration::from_secs(5 * 60);

    /// Creates storage with the default idle window.
    pub fn new() -> Self {
        Self::with_idle_window(Self::DEFAULT_IDLE_WINDOW)
    }

    /// Creates storage with a custom idle window.
    pub fn with_idle_window(idle_window: Duration) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            idle_window,
        }
    }

    /// Returns the number of stored queries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no queries are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn evict_expired(&self, entries: &mut Vec<Entry>) {
        let now = Instant::now();
        entries.retain(|entry| {
            let keep = now.duration_since(entry.last_used) <= self.idle_window;
            if !keep {
                tracing::debug!(query = %entry.query.id, "live query expired");
            }
            keep
        });
    }
}

impl Default for InMemoryLiveQueryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveQueryStorage for InMemoryLiveQueryStorage {
    fn store(&self, query: StoredQuery) {
        self.entries.write().push(Entry {
            query,
            last_used: Instant::now(),
        });
    }

    fn remove(&self, id: &str) {
        self.entries.write().retain(|entry| entry.query.id != id);
    }

    fn keep_alive_and_return_unknown_ids(&self, ids: &[String]) -> Vec<String> {
        let mut entries = self.entries.write();
        let now = Instant::now();
        let mut unknown = Vec::new();
        for id in ids {
            match entries.iter_mut().find(|entry| entry.query.id == *id) {
                Some(entry) => entry.last_used = now,
                None => unknown.push(id.clone()),
            }
        }
        unknown
    }

    fn provide_listeners(
        &self,
        entity_key: &str,
        handle: &mut dyn FnMut(&StoredQuery) -> Option<Vec<ItemId>>,
    ) {
        // Snapshot matching queries so the handler can run repository
        // queries without holding the storage lock.
        let matching: Vec<StoredQuery> = {
            let mut entries = self.entries.write();
            self.evict_expired(&mut entries);
            entries
                .iter()
                .filter(|entry| entry.query.entity_key == entity_key)
                .map(|entry| entry.query.clone())
                .collect()
        };

        for query in matching {
            if let Some(ids) = handle(&query) {
                let mut entries = self.entries.write();
                // The query may have been unsubscribed while the handler
                // ran; its result is simply discarded then.
                if let Some(entry) = entries.iter_mut().find(|entry| entry.query.id == query.id) {
                    entry.query.last_ids = ids;
                }
            }
        }
    }
}

//! Client-side materialization of one live query.

use crate::error::ClientError;
use liveq_core::{EntityMeta, FindOptions};
use liveq_protocol::LiveQueryChange;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Snapshot handed to listeners after each applied delta batch.
pub struct LiveQueryChangeInfo {
    /// Current materialized rows, in query order.
    pub items: Vec<Value>,
    /// The deltas that produced this snapshot.
    pub changes: Vec<LiveQueryChange>,
}

/// One consumer of a live query's results.
pub struct SubscriptionListener {
    next: Box<dyn Fn(&LiveQueryChangeInfo) + Send + Sync>,
    error: Box<dyn Fn(&ClientError) + Send + Sync>,
}

impl SubscriptionListener {
    /// Creates a listener; errors are logged.
    pub fn new<F>(next: F) -> Self
    where
        F: Fn(&LiveQueryChangeInfo) + Send + Sync + 'static,
    {
        Self {
            next: Box::new(next),
            error: Box::new(|error| tracing::warn!(%error, "live query stream error")),
        }
    }

    /// Replaces the error handler.
    pub fn with_error<F>(mut self, error: F) -> Self
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.error = Box::new(error);
        self
    }
}

/// A prepared listener notification.
///
/// Subscriber methods prepare notifications under the caller's lock and
/// hand them back; the caller delivers after releasing every lock, so a
/// listener callback may freely call back into the client without
/// deadlocking.
#[must_use = "listeners are only notified when the notification is delivered"]
pub struct Notification {
    listeners: Vec<Arc<SubscriptionListener>>,
    info: LiveQueryChangeInfo,
}

impl Notification {
    /// Invokes every target listener with the snapshot.
    pub fn deliver(self) {
        for listener in &self.listeners {
            (listener.next)(&self.info);
        }
    }
}

/// A prepared error notification, delivered lock-free like
/// [`Notification`].
#[must_use = "listeners are only notified when the notification is delivered"]
pub struct ErrorNotification {
    listeners: Vec<Arc<SubscriptionListener>>,
}

impl ErrorNotification {
    /// Invokes every target listener's error callback.
    pub fn deliver(self, error: &ClientError) {
        for listener in &self.listeners {
            (listener.error)(error);
        }
    }
}

/// Holds the materialized rows of one query and the listeners sharing
/// it.
///
/// Deltas merge into the row vector by identifier; a `replace` whose
/// old id is unknown and an `add` whose id already exists both act as
/// upserts, so replays and races stay harmless. When the query sorts,
/// the vector is re-sorted after any delta that can disturb order.
///
/// Mutating methods return a [`Notification`] instead of invoking
/// listeners directly; the caller delivers it once no lock is held.
pub struct QuerySubscriber {
    meta: Arc<dyn EntityMeta>,
    options: FindOptions,
    items: Vec<Value>,
    listeners: HashMap<u64, Arc<SubscriptionListener>>,
    next_token: u64,
}

impl QuerySubscriber {
    /// Creates a subscriber seeded with the initial query result.
    pub fn new(meta: Arc<dyn EntityMeta>, options: FindOptions, items: Vec<Value>) -> Self {
        Self {
            meta,
            options,
            items,
            listeners: HashMap::new(),
            next_token: 0,
        }
    }

    /// Returns the current materialized rows.
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    /// Returns the number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Attaches a listener.
    ///
    /// The returned notification delivers the current rows to the new
    /// listener as a synthetic full snapshot.
    pub fn add_listener(&mut self, listener: SubscriptionListener) -> (u64, Notification) {
        let token = self.next_token;
        self.next_token += 1;

        let listener = Arc::new(listener);
        self.listeners.insert(token, listener.clone());

        let notification = Notification {
            listeners: vec![listener],
            info: LiveQueryChangeInfo {
                items: self.items.clone(),
                changes: vec![LiveQueryChange::All(self.items.clone())],
            },
        };
        (token, notification)
    }

    /// Detaches a listener and returns how many remain.
    pub fn remove_listener(&mut self, token: u64) -> usize {
        self.listeners.remove(&token);
        self.listeners.len()
    }

    /// Merges a delta batch into the rows.
    ///
    /// Returns the notification for all listeners, or `None` for an
    /// empty batch, which is ignored without notification.
    pub fn apply(&mut self, changes: &[LiveQueryChange]) -> Option<Notification> {
        if changes.is_empty() {
            return None;
        }

        let meta = self.meta.clone();
        let mut reorder = false;
        for change in changes {
            reorder |= change.affects_order();
            match change {
                LiveQueryChange::All(rows) => {
                    self.items = rows.clone();
                }
                LiveQueryChange::Add { item } => {
                    self.upsert(item);
                }
                LiveQueryChange::Replace { old_id, item } => {
                    let position = self
                        .items
                        .iter()
                        .position(|row| meta.row_id(row).ok().as_ref() == Some(old_id));
                    match position {
                        Some(position) => self.items[position] = item.clone(),
                        None => self.upsert(item),
                    }
                }
                LiveQueryChange::Remove { id } => {
                    self.items
                        .retain(|row| meta.row_id(row).ok().as_ref() != Some(id));
                }
            }
        }

        if reorder && !self.options.order_by.is_empty() {
            let mut items = std::mem::take(&mut self.items);
            self.options.sort_rows(&mut items);
            self.items = items;
        }

        Some(self.notification(changes))
    }

    /// Replaces the rows wholesale, as after a refetch.
    ///
    /// Returns the full-snapshot notification for all listeners.
    pub fn set_all(&mut self, mut items: Vec<Value>) -> Notification {
        self.options.sort_rows(&mut items);
        self.items = items;
        self.notification(&[LiveQueryChange::All(self.items.clone())])
    }

    /// Prepares a stream-error notification for all listeners.
    pub fn stream_error(&self) -> ErrorNotification {
        ErrorNotification {
            listeners: self.listeners.values().cloned().collect(),
        }
    }

    fn upsert(&mut self, item: &Value) {
        match self.meta.row_id(item) {
            Ok(id) => {
                let meta = self.meta.clone();
                self.items
                    .retain(|row| meta.row_id(row).ok().as_ref() != Some(&id));
                self.items.push(item.clone());
            }
            Err(error) => tracing::warn!(%error, "pushed row has no identifier, dropped"),
        }
    }

    fn notification(&self, changes: &[LiveQueryChange]) -> Notification {
        Notification {
            listeners: self.listeners.values().cloned().collect(),
            info: LiveQueryChangeInfo {
                items: self.items.clone(),
                changes: changes.to_vec(),
            },
        }
    }
}

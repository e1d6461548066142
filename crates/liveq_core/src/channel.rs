//! Publish/subscribe primitives keyed by channel.

use crate::error::CoreResult;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Abstract broadcast seam.
///
/// The live query publisher and typed channels hand messages to an
/// implementation, which delivers them to every connection subscribed
/// to the channel key. Implementations range from an in-process
/// registry to an external push service.
pub trait MessagePublisher: Send + Sync {
    /// Broadcasts a message on a channel.
    fn publish(&self, channel: &str, message: &Value) -> CoreResult<()>;
}

/// Handle identifying one listener registration.
///
/// Returned by [`ChannelRegistry::subscribe`]; passing it back to
/// [`ChannelRegistry::unsubscribe`] removes the listener in O(1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelToken {
    channel: String,
    id: u64,
}

type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Listener registry keyed by channel.
///
/// Add, remove and lookup are O(1) in the number of channels and
/// listeners; dispatch clones the listener list so a listener may
/// subscribe or unsubscribe re-entrantly without deadlocking.
#[derive(Default)]
pub struct ChannelRegistry {
    listeners: RwLock<HashMap<String, HashMap<u64, Listener>>>,
    next_id: AtomicU64,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener on a channel.
    pub fn subscribe<F>(&self, channel: &str, listener: F) -> ChannelToken
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .entry(channel.to_string())
            .or_default()
            .insert(id, Arc::new(listener));
        ChannelToken {
            channel: channel.to_string(),
            id,
        }
    }

    /// Removes a listener. Unknown tokens are a no-op.
    pub fn unsubscribe(&self, token: &ChannelToken) {
        let mut listeners = self.listeners.write();
        if let Some(channel) = listeners.get_mut(&token.channel) {
            channel.remove(&token.id);
            if channel.is_empty() {
                listeners.remove(&token.channel);
            }
        }
    }

    /// Delivers a message to every listener on the channel.
    ///
    /// Returns the number of listeners invoked.
    pub fn dispatch(&self, channel: &str, message: &Value) -> usize {
        let targets: Vec<Listener> = match self.listeners.read().get(channel) {
            Some(channel) => channel.values().cloned().collect(),
            None => return 0,
        };
        for listener in &targets {
            listener(message);
        }
        targets.len()
    }

    /// Returns the number of listeners on a channel.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.listeners
            .read()
            .get(channel)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

/// A typed broadcast channel over a string key.
///
/// Wraps a channel key with the message type, so publishing is
/// type-checked while the underlying transport stays untyped.
pub struct SubscriptionChannel<T> {
    channel_key: String,
    _marker: PhantomData<fn(T)>,
}

impl<T: Serialize> SubscriptionChannel<T> {
    /// Creates a channel over the given key.
    pub fn new(channel_key: impl Into<String>) -> Self {
        Self {
            channel_key: channel_key.into(),
            _marker: PhantomData,
        }
    }

    /// Returns the channel key.
    pub fn channel_key(&self) -> &str {
        &self.channel_key
    }

    /// Serializes the message and broadcasts it.
    pub fn publish(&self, publisher: &dyn MessagePublisher, message: &T) -> CoreResult<()> {
        let value = serde_json::to_value(message)?;
        publisher.publish(&self.channel_key, &value)
    }
}

//! In-process loopback transport.
//!
//! Connects a [`LiveQueryClient`](crate::LiveQueryClient) to a server
//! in the same process: the server publishes into a channel registry
//! the client's connections listen on. A connected flag simulates
//! transport outages, with messages published while disconnected lost,
//! matching real push transports.

use crate::error::ClientResult;
use crate::transport::{MessageCallback, SubscriptionClient, SubscriptionConnection, Unsubscribe};
use liveq_core::{ChannelRegistry, ChannelToken, CoreError, CoreResult, MessagePublisher};
use liveq_protocol::StreamMessage;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

type ReconnectHook = Box<dyn Fn() + Send + Sync>;

struct BusInner {
    connected: AtomicBool,
    registry: ChannelRegistry,
    reconnect_hooks: RwLock<Vec<ReconnectHook>>,
    open_connections: AtomicUsize,
}

/// Loopback pub/sub bus, cloneable across the server and client sides.
#[derive(Clone)]
pub struct LoopbackBus {
    inner: Arc<BusInner>,
}

impl LoopbackBus {
    /// Creates a connected bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                connected: AtomicBool::new(true),
                registry: ChannelRegistry::new(),
                reconnect_hooks: RwLock::new(Vec::new()),
                open_connections: AtomicUsize::new(0),
            }),
        }
    }

    /// Drops or restores connectivity without firing reconnect hooks.
    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
    }

    /// Restores connectivity and fires every reconnect hook, as a real
    /// transport does after re-establishing a dropped connection.
    pub fn reconnect(&self) {
        self.inner.connected.store(true, Ordering::SeqCst);
        for hook in self.inner.reconnect_hooks.read().iter() {
            hook();
        }
    }

    /// Returns the number of open connections.
    pub fn open_connections(&self) -> usize {
        self.inner.open_connections.load(Ordering::SeqCst)
    }

    /// Returns the number of listeners on a channel.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.inner.registry.listener_count(channel)
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagePublisher for LoopbackBus {
    fn publish(&self, channel: &str, message: &Value) -> CoreResult<()> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            // Lost on the wire, exactly like a real outage.
            return Ok(());
        }
        // Round-trip through the stream envelope, as a push transport
        // does, so subscribers see exactly what would cross the wire.
        let raw = StreamMessage::new(channel, message)
            .and_then(|m| m.encode())
            .map_err(|e| CoreError::publish(channel, e.to_string()))?;
        let decoded =
            StreamMessage::decode(&raw).map_err(|e| CoreError::publish(channel, e.to_string()))?;
        self.inner.registry.dispatch(&decoded.event, &decoded.data);
        Ok(())
    }
}

struct LoopbackConnection {
    inner: Arc<BusInner>,
    tokens: Mutex<Vec<ChannelToken>>,
}

impl SubscriptionConnection for LoopbackConnection {
    fn subscribe(&self, channel: &str, on_message: MessageCallback) -> ClientResult<Unsubscribe> {
        let token = self
            .inner
            .registry
            .subscribe(channel, move |message| on_message(message));
        self.tokens.lock().push(token.clone());
        let inner = self.inner.clone();
        Ok(Box::new(move || inner.registry.unsubscribe(&token)))
    }

    fn close(&self) {
        // Closing drops every remaining subscription of this connection.
        for token in self.tokens.lock().drain(..) {
            self.inner.registry.unsubscribe(&token);
        }
        self.inner.open_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SubscriptionClient for LoopbackBus {
    fn open_connection(
        &self,
        client_id: &str,
        on_reconnect: Box<dyn Fn() + Send + Sync>,
    ) -> ClientResult<Box<dyn SubscriptionConnection>> {
        tracing::debug!(client = client_id, "loopback connection opened");
        self.inner.reconnect_hooks.write().push(on_reconnect);
        self.inner.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LoopbackConnection {
            inner: self.inner.clone(),
            tokens: Mutex::new(Vec::new()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn publishes_reach_connection_subscribers() {
        let bus = LoopbackBus::new();
        let connection = bus.open_connection("c1", Box::new(|| {})).unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let release = connection
            .subscribe("news", Box::new(move |m| sink.lock().push(m.clone())))
            .unwrap();

        bus.publish("news", &json!("hello")).unwrap();
        assert_eq!(*received.lock(), vec![json!("hello")]);

        release();
        bus.publish("news", &json!("again")).unwrap();
        assert_eq!(received.lock().len(), 1);
    }

    #[test]
    fn disconnected_bus_drops_messages() {
        let bus = LoopbackBus::new();
        let connection = bus.open_connection("c1", Box::new(|| {})).unwrap();

        let count = Arc::new(Mutex::new(0usize));
        let sink = count.clone();
        let _release = connection
            .subscribe("news", Box::new(move |_| *sink.lock() += 1))
            .unwrap();

        bus.set_connected(false);
        bus.publish("news", &json!(1)).unwrap();
        assert_eq!(*count.lock(), 0);

        bus.set_connected(true);
        bus.publish("news", &json!(2)).unwrap();
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn reconnect_fires_hooks() {
        let bus = LoopbackBus::new();
        let fired = Arc::new(Mutex::new(0usize));
        let sink = fired.clone();
        let _connection = bus
            .open_connection("c1", Box::new(move || *sink.lock() += 1))
            .unwrap();

        bus.set_connected(false);
        bus.reconnect();
        assert_eq!(*fired.lock(), 1);
    }

    #[test]
    fn close_drops_remaining_subscriptions() {
        let bus = LoopbackBus::new();
        let connection = bus.open_connection("c1", Box::new(|| {})).unwrap();

        let count = Arc::new(Mutex::new(0usize));
        let sink = count.clone();
        let _release = connection
            .subscribe("news", Box::new(move |_| *sink.lock() += 1))
            .unwrap();
        assert_eq!(bus.listener_count("news"), 1);

        connection.close();
        assert_eq!(bus.listener_count("news"), 0);

        bus.publish("news", &json!(1)).unwrap();
        assert_eq!(*count.lock(), 0);
    }

    #[test]
    fn connections_are_counted() {
        let bus = LoopbackBus::new();
        assert_eq!(bus.open_connections(), 0);

        let connection = bus.open_connection("c1", Box::new(|| {})).unwrap();
        assert_eq!(bus.open_connections(), 1);

        connection.close();
        assert_eq!(bus.open_connections(), 0);
    }
}

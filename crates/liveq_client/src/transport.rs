//! Transport seams the client is generic over.
//!
//! Two independent surfaces reach the server: a request/response
//! fetcher for query registration, and a push connection for channel
//! subscriptions. An HTTP + server-sent-events stack implements both;
//! tests wire them to an in-process loopback.

use crate::error::ClientResult;
use liveq_protocol::SubscribeResponse;
use serde_json::Value;

/// Releases one channel subscription when invoked.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Callback invoked with each message pushed on a channel.
pub type MessageCallback = Box<dyn Fn(&Value) + Send + Sync>;

/// An open push connection carrying channel subscriptions.
pub trait SubscriptionConnection: Send + Sync {
    /// Starts listening on a channel.
    fn subscribe(&self, channel: &str, on_message: MessageCallback) -> ClientResult<Unsubscribe>;

    /// Closes the connection. Remaining subscriptions stop delivering.
    fn close(&self);
}

/// Factory for push connections.
pub trait SubscriptionClient: Send + Sync {
    /// Opens a connection identified by `client_id`.
    ///
    /// `on_reconnect` fires every time the transport re-establishes a
    /// dropped connection; messages pushed while disconnected are lost,
    /// so the client refreshes its queries from the hook.
    fn open_connection(
        &self,
        client_id: &str,
        on_reconnect: Box<dyn Fn() + Send + Sync>,
    ) -> ClientResult<Box<dyn SubscriptionConnection>>;
}

/// Request/response surface for query registration.
pub trait QueryFetcher: Send + Sync {
    /// Registers a live query and returns its initial result.
    fn subscribe_query(
        &self,
        entity_key: &str,
        find_options: &Value,
    ) -> ClientResult<SubscribeResponse>;

    /// Refreshes query ids and returns the subset the server does not
    /// recognize.
    fn keep_alive(&self, query_ids: &[String]) -> ClientResult<Vec<String>>;

    /// Releases a server-side stored query.
    fn unsubscribe_query(&self, query_id: &str) -> ClientResult<()>;
}

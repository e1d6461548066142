//! Live query client over pluggable transport seams.

use crate::error::{ClientError, ClientResult};
use crate::subscriber::{QuerySubscriber, SubscriptionListener};
use crate::transport::{
    MessageCallback, QueryFetcher, SubscriptionClient, SubscriptionConnection, Unsubscribe,
};
use liveq_core::{EntityMeta, FindOptions, SubscriptionChannel};
use liveq_protocol::LiveQueryChange;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

struct ActiveQuery {
    query_id: String,
    entity_key: String,
    options_json: Value,
    subscriber: Arc<Mutex<QuerySubscriber>>,
    channel_unsubscribe: Option<Unsubscribe>,
}

#[derive(Default)]
struct ClientState {
    connection: Option<Arc<dyn SubscriptionConnection>>,
    queries: HashMap<String, ActiveQuery>,
    open_channels: usize,
}

/// Client-side manager of live queries and channel subscriptions.
///
/// Subscriptions with equal signatures (entity key plus canonical
/// options JSON) share one server query, one channel subscription and
/// one materialized row vector. The push connection opens lazily on the
/// first subscription and closes when the last one ends.
///
/// On transport reconnect every active query is refetched, since deltas
/// pushed while disconnected are lost. The host calls
/// [`keep_alive`](LiveQueryClient::keep_alive) periodically; queries
/// the server has expired are refetched transparently.
pub struct LiveQueryClient {
    fetcher: Arc<dyn QueryFetcher>,
    transport: Arc<dyn SubscriptionClient>,
    client_id: String,
    state: Mutex<ClientState>,
}

impl LiveQueryClient {
    /// Creates a client over the given request and push transports.
    pub fn new(fetcher: Arc<dyn QueryFetcher>, transport: Arc<dyn SubscriptionClient>) -> Arc<Self> {
        Arc::new(Self {
            fetcher,
            transport,
            client_id: Uuid::new_v4().to_string(),
            state: Mutex::new(ClientState::default()),
        })
    }

    /// Returns the identity used on the push transport.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the number of distinct active queries.
    pub fn active_query_count(&self) -> usize {
        self.state.lock().queries.len()
    }

    /// Subscribes a listener to a live query.
    ///
    /// The listener immediately receives the current rows as a full
    /// snapshot, then a snapshot after every applied delta batch.
    pub fn subscribe(
        self: &Arc<Self>,
        meta: Arc<dyn EntityMeta>,
        options: &FindOptions,
        listener: SubscriptionListener,
    ) -> ClientResult<QuerySubscription> {
        let signature = options.signature(meta.entity_key())?;
        let mut state = self.state.lock();

        if let Some(query) = state.queries.get(&signature) {
            let (token, notification) = query.subscriber.lock().add_listener(listener);
            drop(state);
            notification.deliver();
            return Ok(QuerySubscription {
                client: self.clone(),
                signature,
                token,
            });
        }

        let connection = self.ensure_connection(&mut state)?;
        let options_json = options.to_json()?;
        let response = match self.fetcher.subscribe_query(meta.entity_key(), &options_json) {
            Ok(response) => response,
            Err(error) => {
                Self::maybe_close(&mut state);
                return Err(error);
            }
        };
        tracing::debug!(
            query = %response.query_channel,
            entity = meta.entity_key(),
            "live query subscribed"
        );

        let subscriber = Arc::new(Mutex::new(QuerySubscriber::new(
            meta.clone(),
            options.clone(),
            response.result,
        )));
        let channel_unsubscribe =
            Self::attach_channel(&connection, &response.query_channel, &subscriber)?;
        let (token, notification) = subscriber.lock().add_listener(listener);

        state.queries.insert(
            signature.clone(),
            ActiveQuery {
                query_id: response.query_channel,
                entity_key: meta.entity_key().to_string(),
                options_json,
                subscriber,
                channel_unsubscribe: Some(channel_unsubscribe),
            },
        );
        drop(state);
        notification.deliver();

        Ok(QuerySubscription {
            client: self.clone(),
            signature,
            token,
        })
    }

    /// Subscribes to a generic broadcast channel.
    ///
    /// The returned closure releases the subscription; the push
    /// connection closes once no queries and no channels remain.
    pub fn subscribe_channel(
        self: &Arc<Self>,
        channel: &str,
        on_message: MessageCallback,
    ) -> ClientResult<Unsubscribe> {
        let mut state = self.state.lock();
        let connection = self.ensure_connection(&mut state)?;
        let unsubscribe = match connection.subscribe(channel, on_message) {
            Ok(unsubscribe) => unsubscribe,
            Err(error) => {
                Self::maybe_close(&mut state);
                return Err(error);
            }
        };
        state.open_channels += 1;
        drop(state);

        let client = self.clone();
        Ok(Box::new(move || {
            unsubscribe();
            let mut state = client.state.lock();
            state.open_channels -= 1;
            LiveQueryClient::maybe_close(&mut state);
        }))
    }

    /// Subscribes to a typed channel, decoding each message.
    ///
    /// Messages that fail to decode are logged and dropped.
    pub fn subscribe_typed<T, F>(
        self: &Arc<Self>,
        channel: &SubscriptionChannel<T>,
        handler: F,
    ) -> ClientResult<Unsubscribe>
    where
        T: DeserializeOwned + Serialize,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_channel(
            channel.channel_key(),
            Box::new(move |message| match serde_json::from_value::<T>(message.clone()) {
                Ok(value) => handler(value),
                Err(error) => tracing::warn!(%error, "channel message decode failed, dropped"),
            }),
        )
    }

    /// Refreshes all active queries on the server.
    ///
    /// Queries the server no longer recognizes (expired or lost) are
    /// re-registered and their listeners receive a fresh snapshot. The
    /// host calls this on a timer well inside the server's idle window.
    pub fn keep_alive(&self) -> ClientResult<()> {
        let active: Vec<(String, String)> = {
            let state = self.state.lock();
            state
                .queries
                .iter()
                .map(|(signature, query)| (signature.clone(), query.query_id.clone()))
                .collect()
        };
        if active.is_empty() {
            return Ok(());
        }

        let query_ids: Vec<String> = active.iter().map(|(_, id)| id.clone()).collect();
        let unknown = self.fetcher.keep_alive(&query_ids)?;
        for (signature, query_id) in &active {
            if unknown.contains(query_id) {
                tracing::debug!(query = %query_id, "server lost live query, refetching");
                if let Err(error) = self.refetch(signature) {
                    tracing::warn!(%error, "live query refresh failed");
                }
            }
        }
        Ok(())
    }

    fn ensure_connection(
        self: &Arc<Self>,
        state: &mut ClientState,
    ) -> ClientResult<Arc<dyn SubscriptionConnection>> {
        if let Some(connection) = &state.connection {
            return Ok(connection.clone());
        }
        let weak = Arc::downgrade(self);
        let connection: Arc<dyn SubscriptionConnection> = Arc::from(
            self.transport.open_connection(
                &self.client_id,
                Box::new(move || {
                    if let Some(client) = weak.upgrade() {
                        client.handle_reconnect();
                    }
                }),
            )?,
        );
        state.connection = Some(connection.clone());
        Ok(connection)
    }

    fn attach_channel(
        connection: &Arc<dyn SubscriptionConnection>,
        channel: &str,
        subscriber: &Arc<Mutex<QuerySubscriber>>,
    ) -> ClientResult<Unsubscribe> {
        let subscriber = subscriber.clone();
        connection.subscribe(
            channel,
            Box::new(move |message| {
                // Prepare under the lock, deliver outside it, so a
                // listener may call back into the client.
                match serde_json::from_value::<Vec<LiveQueryChange>>(message.clone()) {
                    Ok(deltas) => {
                        let notification = subscriber.lock().apply(&deltas);
                        if let Some(notification) = notification {
                            notification.deliver();
                        }
                    }
                    Err(error) => {
                        let notification = subscriber.lock().stream_error();
                        notification.deliver(&liveq_protocol::ProtocolError::from(error).into());
                    }
                }
            }),
        )
    }

    /// Re-registers one query on the server and swaps the channel
    /// subscription over to the fresh query id.
    fn refetch(&self, signature: &str) -> ClientResult<()> {
        let (entity_key, options_json) = {
            let state = self.state.lock();
            match state.queries.get(signature) {
                Some(query) => (query.entity_key.clone(), query.options_json.clone()),
                None => return Ok(()),
            }
        };
        let response = self.fetcher.subscribe_query(&entity_key, &options_json)?;

        let mut state = self.state.lock();
        let connection = match &state.connection {
            Some(connection) => connection.clone(),
            None => return Err(ClientError::NotConnected),
        };
        let query = match state.queries.get_mut(signature) {
            Some(query) => query,
            None => {
                // Unsubscribed while the fetch was in flight.
                let _ = self.fetcher.unsubscribe_query(&response.query_channel);
                return Ok(());
            }
        };

        if let Some(unsubscribe) = query.channel_unsubscribe.take() {
            unsubscribe();
        }
        let old_id = std::mem::replace(&mut query.query_id, response.query_channel.clone());
        query.channel_unsubscribe = Some(Self::attach_channel(
            &connection,
            &response.query_channel,
            &query.subscriber,
        )?);
        let notification = query.subscriber.lock().set_all(response.result);
        drop(state);
        notification.deliver();

        if old_id != response.query_channel {
            if let Err(error) = self.fetcher.unsubscribe_query(&old_id) {
                tracing::debug!(%error, "stale query release failed");
            }
        }
        Ok(())
    }

    fn handle_reconnect(&self) {
        let signatures: Vec<String> = self.state.lock().queries.keys().cloned().collect();
        tracing::debug!(queries = signatures.len(), "reconnected, refreshing live queries");
        for signature in &signatures {
            if let Err(error) = self.refetch(signature) {
                tracing::warn!(%error, "live query refresh after reconnect failed");
            }
        }
    }

    fn release(&self, signature: &str, token: u64) {
        let mut state = self.state.lock();
        let remaining = match state.queries.get(signature) {
            Some(query) => query.subscriber.lock().remove_listener(token),
            None => return,
        };
        if remaining > 0 {
            return;
        }

        if let Some(mut query) = state.queries.remove(signature) {
            if let Some(unsubscribe) = query.channel_unsubscribe.take() {
                unsubscribe();
            }
            tracing::debug!(query = %query.query_id, "live query unsubscribed");
            if let Err(error) = self.fetcher.unsubscribe_query(&query.query_id) {
                tracing::debug!(%error, "query release failed");
            }
        }
        Self::maybe_close(&mut state);
    }

    fn maybe_close(state: &mut ClientState) {
        if state.queries.is_empty() && state.open_channels == 0 {
            if let Some(connection) = state.connection.take() {
                connection.close();
            }
        }
    }
}

/// Handle to one listener on a live query.
///
/// Dropping the handle does not unsubscribe; call
/// [`unsubscribe`](QuerySubscription::unsubscribe) explicitly. The
/// shared query ends on the server once its last listener is gone.
pub struct QuerySubscription {
    client: Arc<LiveQueryClient>,
    signature: String,
    token: u64,
}

impl QuerySubscription {
    /// Returns the current materialized rows of the shared query.
    pub fn items(&self) -> Vec<Value> {
        let state = self.client.state.lock();
        match state.queries.get(&self.signature) {
            Some(query) => query.subscriber.lock().items().to_vec(),
            None => Vec::new(),
        }
    }

    /// Detaches this listener, releasing the server query when it was
    /// the last one.
    pub fn unsubscribe(self) {
        self.client.release(&self.signature, self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liveq_core::{CoreError, CoreResult};
    use liveq_protocol::{ItemId, SubscribeResponse};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TasksMeta;

    impl EntityMeta for TasksMeta {
        fn entity_key(&self) -> &str {
            "tasks"
        }

        fn row_id(&self, row: &Value) -> CoreResult<ItemId> {
            row.get("id")
                .and_then(ItemId::from_value)
                .ok_or_else(|| CoreError::missing_id("id"))
        }
    }

    #[derive(Default)]
    struct MockFetcher {
        fetches: AtomicUsize,
        unsubscribed: Mutex<Vec<String>>,
        unknown: Mutex<Vec<String>>,
    }

    impl QueryFetcher for MockFetcher {
        fn subscribe_query(
            &self,
            _entity_key: &str,
            _find_options: &Value,
        ) -> ClientResult<SubscribeResponse> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(SubscribeResponse {
                result: vec![json!({"id": 1})],
                query_channel: format!("q{n}"),
            })
        }

        fn keep_alive(&self, _query_ids: &[String]) -> ClientResult<Vec<String>> {
            Ok(std::mem::take(&mut *self.unknown.lock()))
        }

        fn unsubscribe_query(&self, query_id: &str) -> ClientResult<()> {
            self.unsubscribed.lock().push(query_id.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockTransport {
        opens: AtomicUsize,
        closes: Arc<AtomicUsize>,
    }

    struct MockConnection {
        closes: Arc<AtomicUsize>,
    }

    impl SubscriptionConnection for MockConnection {
        fn subscribe(
            &self,
            _channel: &str,
            _on_message: MessageCallback,
        ) -> ClientResult<Unsubscribe> {
            Ok(Box::new(|| {}))
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl SubscriptionClient for MockTransport {
        fn open_connection(
            &self,
            _client_id: &str,
            _on_reconnect: Box<dyn Fn() + Send + Sync>,
        ) -> ClientResult<Box<dyn SubscriptionConnection>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockConnection {
                closes: self.closes.clone(),
            }))
        }
    }

    fn client() -> (Arc<LiveQueryClient>, Arc<MockFetcher>, Arc<MockTransport>) {
        let fetcher = Arc::new(MockFetcher::default());
        let transport = Arc::new(MockTransport::default());
        let client = LiveQueryClient::new(fetcher.clone(), transport.clone());
        (client, fetcher, transport)
    }

    fn noop_listener() -> SubscriptionListener {
        SubscriptionListener::new(|_| {})
    }

    #[test]
    fn equal_signatures_share_one_server_query() {
        let (client, fetcher, transport) = client();
        let meta = Arc::new(TasksMeta);
        let options = FindOptions::new().with_filter("done", json!(false));

        let a = client
            .subscribe(meta.clone(), &options, noop_listener())
            .unwrap();
        let b = client.subscribe(meta, &options, noop_listener()).unwrap();

        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);
        assert_eq!(client.active_query_count(), 1);
        a.unsubscribe();
        b.unsubscribe();
    }

    #[test]
    fn distinct_options_fetch_separately_over_one_connection() {
        let (client, fetcher, transport) = client();
        let meta = Arc::new(TasksMeta);

        let a = client
            .subscribe(meta.clone(), &FindOptions::new(), noop_listener())
            .unwrap();
        let b = client
            .subscribe(
                meta,
                &FindOptions::new().with_limit(5),
                noop_listener(),
            )
            .unwrap();

        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);
        a.unsubscribe();
        b.unsubscribe();
    }

    #[test]
    fn last_listener_releases_query_and_connection() {
        let (client, fetcher, transport) = client();
        let meta = Arc::new(TasksMeta);
        let options = FindOptions::new();

        let a = client
            .subscribe(meta.clone(), &options, noop_listener())
            .unwrap();
        let b = client
            .subscribe(meta.clone(), &options, noop_listener())
            .unwrap();

        a.unsubscribe();
        assert!(fetcher.unsubscribed.lock().is_empty());
        assert_eq!(transport.closes.load(Ordering::SeqCst), 0);

        b.unsubscribe();
        assert_eq!(*fetcher.unsubscribed.lock(), vec!["q0".to_string()]);
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);

        // A new subscription starts from scratch.
        let c = client.subscribe(meta, &options, noop_listener()).unwrap();
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 2);
        c.unsubscribe();
    }

    #[test]
    fn keep_alive_refetches_unknown_queries() {
        let (client, fetcher, _transport) = client();
        let meta = Arc::new(TasksMeta);

        let subscription = client
            .subscribe(meta, &FindOptions::new(), noop_listener())
            .unwrap();
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);

        client.keep_alive().unwrap();
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);

        fetcher.unknown.lock().push("q0".to_string());
        client.keep_alive().unwrap();
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 2);
        subscription.unsubscribe();
    }

    #[test]
    fn listener_may_call_back_into_the_client() {
        let (client, _fetcher, _transport) = client();
        let meta = Arc::new(TasksMeta);

        // The callback runs during subscribe; it must not block on the
        // client's own state lock.
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer = client.clone();
        let listener = SubscriptionListener::new(move |_| {
            sink.lock().push(observer.active_query_count());
        });

        let subscription = client.subscribe(meta, &FindOptions::new(), listener).unwrap();
        assert_eq!(*seen.lock(), vec![1]);
        subscription.unsubscribe();
    }

    #[test]
    fn channel_subscriptions_keep_the_connection_open() {
        let (client, _fetcher, transport) = client();

        let release = client
            .subscribe_channel("news", Box::new(|_| {}))
            .unwrap();
        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);

        release();
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
    }
}

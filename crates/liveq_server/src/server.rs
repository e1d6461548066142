//! Subscribe / keep-alive / unsubscribe facade.

use crate::error::ServerResult;
use crate::publisher::LiveQueryPublisher;
use crate::storage::{LiveQueryStorage, StoredQuery};
use liveq_core::{ChangesListener, FindOptions, MessagePublisher, RepositoryProvider};
use liveq_protocol::SubscribeResponse;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Server entry point for live query registration.
///
/// Owns the query storage and the [`LiveQueryPublisher`]. A transport
/// layer maps its endpoints onto [`subscribe`](LiveQueryServer::subscribe),
/// [`unsubscribe`](LiveQueryServer::unsubscribe) and
/// [`keep_alive`](LiveQueryServer::keep_alive); the host wires
/// [`change_listener`](LiveQueryServer::change_listener) into the
/// repositories' change notifier.
pub struct LiveQueryServer {
    storage: Arc<dyn LiveQueryStorage>,
    repositories: Arc<dyn RepositoryProvider>,
    publisher: Arc<LiveQueryPublisher>,
}

impl LiveQueryServer {
    /// Creates a server over the given storage, repositories and
    /// broadcast seam.
    pub fn new(
        storage: Arc<dyn LiveQueryStorage>,
        repositories: Arc<dyn RepositoryProvider>,
        bus: Arc<dyn MessagePublisher>,
    ) -> Self {
        let publisher = Arc::new(LiveQueryPublisher::new(
            storage.clone(),
            repositories.clone(),
            bus,
        ));
        Self {
            storage,
            repositories,
            publisher,
        }
    }

    /// Registers a live query and returns its initial result.
    ///
    /// Runs the query once under the caller's context, stores it with a
    /// fresh id and hands that id back as the broadcast channel key.
    pub fn subscribe(
        &self,
        entity_key: &str,
        find_options_json: &Value,
        request_json: &Value,
    ) -> ServerResult<SubscribeResponse> {
        let repository = self.repositories.resolve(entity_key, request_json)?;
        let options = FindOptions::from_json(find_options_json)?;

        let result = repository.find(&options)?;
        let mut last_ids = Vec::with_capacity(result.len());
        for item in &result {
            last_ids.push(repository.row_id(item)?);
        }

        let id = Uuid::new_v4().to_string();
        tracing::debug!(query = %id, entity = entity_key, "live query registered");
        self.storage.store(StoredQuery {
            id: id.clone(),
            entity_key: entity_key.to_string(),
            find_options_json: find_options_json.clone(),
            request_json: request_json.clone(),
            last_ids,
        });

        Ok(SubscribeResponse {
            result,
            query_channel: id,
        })
    }

    /// Releases a stored query. Unknown ids are ignored.
    pub fn unsubscribe(&self, query_id: &str) {
        tracing::debug!(query = %query_id, "live query released");
        self.storage.remove(query_id);
    }

    /// Refreshes the given query ids and returns the subset the server
    /// does not recognize.
    pub fn keep_alive(&self, query_ids: &[String]) -> Vec<String> {
        self.storage.keep_alive_and_return_unknown_ids(query_ids)
    }

    /// Returns the listener to install on the repositories' notifier.
    pub fn change_listener(&self) -> Arc<dyn ChangesListener> {
        self.publisher.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryLiveQueryStorage;
    use liveq_core::{
        ChannelRegistry, CoreResult, MemoryRepository, MemoryRepositoryProvider, RequestContext,
    };
    use liveq_protocol::LiveQueryChange;
    use parking_lot::Mutex;
    use serde_json::json;

    struct RegistryBus(ChannelRegistry);

    impl MessagePublisher for RegistryBus {
        fn publish(&self, channel: &str, message: &Value) -> CoreResult<()> {
            self.0.dispatch(channel, message);
            Ok(())
        }
    }

    fn server_with_rows() -> (LiveQueryServer, MemoryRepository, Arc<RegistryBus>) {
        let repo = MemoryRepository::new("tasks");
        repo.insert_many(vec![
            json!({"id": 1, "done": false}),
            json!({"id": 2, "done": true}),
        ])
        .unwrap();

        let provider = Arc::new(MemoryRepositoryProvider::new());
        provider.register(repo.clone());

        let bus = Arc::new(RegistryBus(ChannelRegistry::new()));
        let server = LiveQueryServer::new(
            Arc::new(InMemoryLiveQueryStorage::new()),
            provider,
            bus.clone(),
        );
        repo.notifier().set_listener(server.change_listener());
        (server, repo, bus)
    }

    #[test]
    fn subscribe_returns_initial_rows_and_channel() {
        let (server, _repo, _bus) = server_with_rows();
        let request = RequestContext::anonymous().to_json().unwrap();

        let options = FindOptions::new().with_filter("done", json!(false));
        let response = server
            .subscribe("tasks", &options.to_json().unwrap(), &request)
            .unwrap();

        assert_eq!(response.result, vec![json!({"id": 1, "done": false})]);
        assert!(!response.query_channel.is_empty());
    }

    #[test]
    fn each_subscription_gets_a_distinct_channel() {
        let (server, _repo, _bus) = server_with_rows();
        let request = json!({});

        let a = server.subscribe("tasks", &json!({}), &request).unwrap();
        let b = server.subscribe("tasks", &json!({}), &request).unwrap();
        assert_ne!(a.query_channel, b.query_channel);
    }

    #[test]
    fn deltas_arrive_on_the_query_channel() {
        let (server, repo, bus) = server_with_rows();
        let response = server.subscribe("tasks", &json!({}), &json!({})).unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let _token = bus.0.subscribe(&response.query_channel, move |message| {
            let deltas: Vec<LiveQueryChange> =
                serde_json::from_value(message.clone()).expect("delta batch");
            sink.lock().extend(deltas);
        });

        repo.insert(json!({"id": 3, "done": false})).unwrap();

        let deltas = received.lock();
        assert_eq!(
            *deltas,
            vec![LiveQueryChange::Add {
                item: json!({"id": 3, "done": false}),
            }]
        );
    }

    #[test]
    fn unsubscribe_stops_broadcasts() {
        let (server, repo, bus) = server_with_rows();
        let response = server.subscribe("tasks", &json!({}), &json!({})).unwrap();

        let count = Arc::new(Mutex::new(0usize));
        let sink = count.clone();
        let _token = bus.0.subscribe(&response.query_channel, move |_| {
            *sink.lock() += 1;
        });

        server.unsubscribe(&response.query_channel);
        repo.insert(json!({"id": 3, "done": false})).unwrap();

        assert_eq!(*count.lock(), 0);
    }

    #[test]
    fn keep_alive_separates_known_from_unknown() {
        let (server, _repo, _bus) = server_with_rows();
        let response = server.subscribe("tasks", &json!({}), &json!({})).unwrap();

        let unknown = server.keep_alive(&[
            response.query_channel.clone(),
            "stale".to_string(),
        ]);
        assert_eq!(unknown, vec!["stale".to_string()]);
    }

    #[test]
    fn subscribe_unknown_entity_fails() {
        let (server, _repo, _bus) = server_with_rows();
        assert!(server.subscribe("nope", &json!({}), &json!({})).is_err());
    }
}

//! Request, response and stream messages for live queries.

use crate::delta::LiveQueryChange;
use crate::error::WireResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Query registration request carrying the serialized filter/sort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Stable entity type key.
    #[serde(rename = "entityKey")]
    pub entity_key: String,
    /// Serialized filter, sort and pagination.
    #[serde(rename = "findOptions")]
    pub find_options: Value,
}

/// Response to a query registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeResponse {
    /// Initial rows matching the query.
    pub result: Vec<Value>,
    /// Opaque channel id deltas will be broadcast on.
    #[serde(rename = "queryChannel")]
    pub query_channel: String,
}

/// Keep-alive ping listing the query ids a client still holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepAliveRequest {
    /// Active query ids on the client.
    #[serde(rename = "queryIds")]
    pub query_ids: Vec<String>,
}

/// Keep-alive reply listing ids the server does not recognize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepAliveResponse {
    /// Ids the client must re-subscribe.
    #[serde(rename = "unknownIds")]
    pub unknown_ids: Vec<String>,
}

/// Explicit release of a server-side stored query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    /// Query id to release.
    #[serde(rename = "queryId")]
    pub query_id: String,
}

/// Registration of a client on a generic broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSubscription {
    /// Client identity on the stream endpoint.
    #[serde(rename = "clientId")]
    pub client_id: String,
    /// Channel key to subscribe.
    pub channel: String,
}

/// A server-push message on the stream endpoint.
///
/// `event` is either a query id (payload: a `LiveQueryChange` batch) or
/// a generic channel key (payload: an arbitrary message).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Channel key or query id.
    pub event: String,
    /// Message payload.
    pub data: Value,
}

impl StreamMessage {
    /// Creates a stream message from any serializable payload.
    pub fn new<T: Serialize>(event: impl Into<String>, data: &T) -> WireResult<Self> {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Interprets the payload as a live query delta batch.
    pub fn query_deltas(&self) -> WireResult<Vec<LiveQueryChange>> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Encodes the message to a JSON string.
    pub fn encode(&self) -> WireResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a message from a JSON string.
    pub fn decode(raw: &str) -> WireResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

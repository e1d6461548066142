//! # LiveQ Client
//!
//! Client-side live query subscription, merge and reconnect for LiveQ.
//!
//! This crate provides:
//! - `LiveQueryClient`, which shares one server query per signature,
//!   opens the push connection lazily and closes it with the last
//!   listener
//! - `QuerySubscriber`, the materialized rows of one query, merged from
//!   pushed delta batches
//! - Transport seams (`QueryFetcher`, `SubscriptionClient`) a concrete
//!   HTTP/SSE stack plugs into
//! - `LoopbackBus`, an in-process transport for tests and embedded use
//!
//! ## Architecture
//!
//! Subscribing runs the query once over the fetcher, then listens for
//! delta batches on a push channel keyed by the server-assigned query
//! id. Listeners receive a full row snapshot after every applied batch.
//! On reconnect all active queries are refetched since deltas pushed
//! while disconnected are lost; periodic `keep_alive` calls refresh
//! server-side queries and transparently re-register expired ones.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod error;
mod loopback;
mod subscriber;
mod transport;

pub use client::{LiveQueryClient, QuerySubscription};
pub use error::{ClientError, ClientResult};
pub use loopback::LoopbackBus;
pub use subscriber::{
    ErrorNotification, LiveQueryChangeInfo, Notification, QuerySubscriber, SubscriptionListener,
};
pub use transport::{
    MessageCallback, QueryFetcher, SubscriptionClient, SubscriptionConnection, Unsubscribe,
};

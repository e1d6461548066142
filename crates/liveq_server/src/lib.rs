//! # LiveQ Server
//!
//! Server-side live query storage, diffing and broadcast for LiveQ.
//!
//! This crate provides:
//! - `LiveQueryStorage` trait and in-memory implementation with
//!   keep-alive and idle expiry
//! - `LiveQueryPublisher`, which re-evaluates stored queries on every
//!   entity change and broadcasts per-query delta batches
//! - `LiveQueryServer`, the subscribe / keep-alive / unsubscribe facade
//!
//! ## Architecture
//!
//! Repositories report committed mutations to the publisher through the
//! core `ChangeNotifier`. For each stored query of the mutated entity,
//! the publisher re-runs the original filter under the original
//! caller's context, diffs the previous id set against the current one
//! and broadcasts the resulting deltas on the channel keyed by the
//! query id.
//!
//! ## Key Invariants
//!
//! - Changes for one entity key are fanned out fully before the next
//!   batch for that key starts; different keys may proceed concurrently
//! - A query's stored id set is only replaced after a successful
//!   re-evaluation; failures skip the query and leave it intact
//! - Identifier-changing updates surface as a single `replace`, never a
//!   `remove` plus an `add`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod publisher;
mod server;
mod storage;

pub use error::{ServerError, ServerResult};
pub use publisher::LiveQueryPublisher;
pub use server::LiveQueryServer;
pub use storage::{InMemoryLiveQueryStorage, LiveQueryStorage, StoredQuery};

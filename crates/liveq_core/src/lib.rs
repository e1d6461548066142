//! # LiveQ Core
//!
//! Repository model, change notification and subscription channels for
//! LiveQ.
//!
//! This crate provides:
//! - Entity repository traits (`EntityMeta`, `Repository`,
//!   `RepositoryProvider`) over API-JSON rows
//! - `FindOptions` for serializable filter/sort/pagination
//! - `RequestContext` for opaque caller identity, serializable for
//!   background re-evaluation
//! - `ChangeNotifier` as a pluggable sink for mutation outcomes
//! - `ChannelRegistry` and `SubscriptionChannel` publish/subscribe
//!   primitives keyed by channel
//! - `MemoryRepository`, the in-memory backend used as the
//!   zero-dependency default and as the stand-in for external database
//!   drivers
//!
//! ## Architecture
//!
//! Repositories mutate rows and report every committed change through a
//! `ChangeNotifier`. A registered listener (typically the live query
//! publisher) turns those changes into per-query deltas and broadcasts
//! them through a `MessagePublisher`. There is no process-wide default
//! notifier or channel: contexts are explicit objects handed to
//! repository construction.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod context;
mod error;
mod find;
mod memory;
mod notifier;
mod repository;

pub use channel::{ChannelRegistry, ChannelToken, MessagePublisher, SubscriptionChannel};
pub use context::RequestContext;
pub use error::{CoreError, CoreResult};
pub use find::{FindOptions, SortSegment};
pub use memory::{MemoryRepository, MemoryRepositoryProvider, RowDecorator};
pub use notifier::{ChangeNotifier, ChangesListener};
pub use repository::{EntityMeta, Repository, RepositoryProvider};

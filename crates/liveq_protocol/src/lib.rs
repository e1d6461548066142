//! # LiveQ Protocol
//!
//! Wire protocol types and JSON codecs for LiveQ.
//!
//! This crate provides:
//! - `ItemId` for typed row identifiers (value equality)
//! - `ChangeRecord` for repository mutation notifications
//! - `LiveQueryChange` delta variants (all/add/replace/remove)
//! - Subscribe, keep-alive, unsubscribe and stream messages
//! - JSON encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod delta;
mod error;
mod id;
mod messages;

pub use change::{ChangeKind, ChangeRecord};
pub use delta::LiveQueryChange;
pub use error::{ProtocolError, WireResult};
pub use id::ItemId;
pub use messages::{
    ChannelSubscription, KeepAliveRequest, KeepAliveResponse, StreamMessage, SubscribeRequest,
    SubscribeResponse, UnsubscribeRequest,
};

//! Domain and wire types for order book reconciliation.
//!
//! - [`asset`] - Asset classes and which of them share a feed
//! - [`pair`] - Currency pairs and the [`BookKey`] registry key
//! - [`book`] - Price levels, incremental updates and REST snapshots
//! - [`messages`] - WebSocket and REST payloads as they arrive on the wire

pub mod asset;
pub mod book;
pub mod messages;
pub mod pair;

pub use asset::Asset;
pub use book::{Level, Snapshot, Update};
pub use messages::WsMessage;
pub use pair::{BookKey, Pair};

/// Exchange sequence number
///
/// Updates carry the last sequence number they cover; snapshots carry the
/// sequence number they were taken at. Ids only ever increase per book.
pub type UpdateId = u64;

/// Timestamp in milliseconds since Unix epoch
pub type TimestampMs = u64;

//! WebSocket and REST wire types.
//!
//! The adapters in [`crate::client`] speak the v4 envelope used by Gate-style
//! exchanges: every WebSocket frame is an object with `channel`, `event` and an
//! optional `result`, and diff-depth results carry the `U`/`u` sequence range.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Level, TimestampMs, UpdateId};

/// WebSocket request sent to the server
#[derive(Debug, Clone, Serialize)]
pub struct WsRequest {
    /// Unix time in seconds
    pub time: i64,
    /// Client-chosen request id, echoed in the response
    pub id: u64,
    /// Channel name, e.g. `spot.order_book_update`
    pub channel: String,
    /// Request kind
    pub event: WsEvent,
    /// Channel arguments
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<String>,
}

/// Request kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WsEvent {
    /// Start receiving a channel
    Subscribe,
    /// Stop receiving a channel
    Unsubscribe,
}

/// WebSocket message received from the server
#[derive(Debug, Clone, Deserialize)]
pub struct WsMessage {
    /// Unix time in seconds
    #[serde(default)]
    pub time: Option<i64>,
    /// Request id (only on responses to our requests)
    #[serde(default)]
    pub id: Option<u64>,
    /// Channel name
    pub channel: String,
    /// `subscribe`, `unsubscribe`, `update` or `all`
    pub event: String,
    /// Error details, set when a request failed
    #[serde(default)]
    pub error: Option<ErrorDetails>,
    /// Channel specific payload
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

impl WsMessage {
    /// Whether this frame is a data push rather than a request acknowledgement
    pub fn is_update(&self) -> bool {
        self.event == "update" || self.event == "all"
    }
}

/// Error details
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetails {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
}

/// Diff-depth push: levels changed between sequence numbers `U` and `u`
#[derive(Debug, Clone, Deserialize)]
pub struct DepthUpdateMsg {
    /// Exchange timestamp in milliseconds
    #[serde(rename = "t")]
    pub time_ms: TimestampMs,
    /// Currency pair or contract name
    #[serde(rename = "s")]
    pub symbol: String,
    /// First sequence number covered
    #[serde(rename = "U")]
    pub first_update_id: UpdateId,
    /// Last sequence number covered
    #[serde(rename = "u")]
    pub last_update_id: UpdateId,
    /// Changed bids
    #[serde(rename = "b", default)]
    pub bids: Vec<WireLevel>,
    /// Changed asks
    #[serde(rename = "a", default)]
    pub asks: Vec<WireLevel>,
}

/// A price level as exchanges send it
///
/// Spot endpoints use `["price", "amount"]` arrays, futures endpoints use
/// `{"p": "price", "s": size}` objects.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum WireLevel {
    /// `[price, amount]`
    Array(Decimal, Decimal),
    /// `{"p": price, "s": size}`
    Object {
        /// Price
        p: Decimal,
        /// Size
        s: Decimal,
    },
}

impl From<WireLevel> for Level {
    fn from(level: WireLevel) -> Self {
        match level {
            WireLevel::Array(price, amount) => Level::new(price, amount),
            WireLevel::Object { p, s } => Level::new(p, s),
        }
    }
}

/// REST order book response (requested with `with_id=true`)
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookResponse {
    /// Sequence number the book was taken at
    pub id: UpdateId,
    /// Response time, milliseconds on spot, fractional seconds on futures
    #[serde(default)]
    pub current: Option<f64>,
    /// Bids, best first
    #[serde(default)]
    pub bids: Vec<WireLevel>,
    /// Asks, best first
    #[serde(default)]
    pub asks: Vec<WireLevel>,
}

impl OrderBookResponse {
    /// Response time normalised to milliseconds
    pub fn time_ms(&self) -> TimestampMs {
        match self.current {
            // Seconds with a fractional part are well below 1e12
            Some(t) if t < 1e12 => (t * 1000.0).round() as TimestampMs,
            Some(t) => t as TimestampMs,
            None => 0,
        }
    }
}

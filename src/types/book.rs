//! Price levels, incremental updates and snapshots.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Asset, BookKey, Pair, TimestampMs, UpdateId};

/// One price level: an absolute amount resting at a price
///
/// An amount of zero removes the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Price
    pub price: Decimal,
    /// Total amount at this price
    pub amount: Decimal,
}

impl Level {
    /// Create a level
    pub fn new(price: Decimal, amount: Decimal) -> Self {
        Self { price, amount }
    }
}

impl From<(Decimal, Decimal)> for Level {
    fn from((price, amount): (Decimal, Decimal)) -> Self {
        Self { price, amount }
    }
}

/// One incremental diff message for a book
///
/// `update_id` is the last sequence number the message covers. The first one
/// travels alongside (see `SyncManager::process_orderbook_update`) because not
/// every exchange reports it in the same place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Currency pair
    pub pair: Pair,
    /// Asset class the feed belongs to
    pub asset: Asset,
    /// Last sequence number covered by this message
    pub update_id: UpdateId,
    /// Exchange timestamp
    pub update_time: TimestampMs,
    /// Bid levels to set
    pub bids: Vec<Level>,
    /// Ask levels to set
    pub asks: Vec<Level>,
    /// Accept the update even when it changes no levels
    #[serde(default)]
    pub allow_empty: bool,
}

impl Update {
    /// Create an update with no levels
    pub fn new(pair: Pair, asset: Asset, update_id: UpdateId) -> Self {
        Self {
            pair,
            asset,
            update_id,
            update_time: 0,
            bids: Vec::new(),
            asks: Vec::new(),
            allow_empty: false,
        }
    }

    /// Set bid levels
    #[must_use]
    pub fn with_bids(mut self, bids: Vec<Level>) -> Self {
        self.bids = bids;
        self
    }

    /// Set ask levels
    #[must_use]
    pub fn with_asks(mut self, asks: Vec<Level>) -> Self {
        self.asks = asks;
        self
    }

    /// Set the exchange timestamp
    #[must_use]
    pub fn with_update_time(mut self, update_time: TimestampMs) -> Self {
        self.update_time = update_time;
        self
    }

    /// Mark the update as valid even without level changes
    #[must_use]
    pub fn allow_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }

    /// Key of the book this update targets
    pub fn key(&self) -> BookKey {
        BookKey::new(&self.pair, self.asset)
    }

    /// Whether the update changes no levels
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// Full point-in-time book state fetched over REST
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Currency pair
    pub pair: Pair,
    /// Asset class
    pub asset: Asset,
    /// Sequence number the snapshot was taken at
    pub last_update_id: UpdateId,
    /// Exchange timestamp
    pub update_time: TimestampMs,
    /// Bid levels
    pub bids: Vec<Level>,
    /// Ask levels
    pub asks: Vec<Level>,
}

impl Snapshot {
    /// Create an empty snapshot at `last_update_id`
    pub fn new(pair: Pair, asset: Asset, last_update_id: UpdateId) -> Self {
        Self {
            pair,
            asset,
            last_update_id,
            update_time: 0,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    /// Set bid levels
    #[must_use]
    pub fn with_bids(mut self, bids: Vec<Level>) -> Self {
        self.bids = bids;
        self
    }

    /// Set ask levels
    #[must_use]
    pub fn with_asks(mut self, asks: Vec<Level>) -> Self {
        self.asks = asks;
        self
    }

    /// Key of the book this snapshot describes
    pub fn key(&self) -> BookKey {
        BookKey::new(&self.pair, self.asset)
    }
}

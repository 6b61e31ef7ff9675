//! Core orderbook data structure.
//!
//! This implementation uses `BTreeMap` for sorted price levels, providing:
//!
//! - O(log n) insertion, deletion, and lookup
//! - O(1) access to best bid/ask (via `first_key_value` / `last_key_value`)
//! - Ordered iteration for depth-of-book queries

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::error::Error;
use crate::types::{BookKey, Level, Snapshot, TimestampMs, Update, UpdateId};

/// Local copy of one exchange order book.
///
/// # Design Decisions
///
/// 1. **Decimal prices**: Prices and amounts are `rust_decimal::Decimal`,
///    avoiding floating-point drift and enabling exact comparisons.
///
/// 2. **BTreeMap**: Provides sorted price levels with O(log n) operations.
///    Best bid/ask are O(1) via `last_key_value()` / `first_key_value()`.
///
/// 3. **Absolute amounts**: Updates carry the new total at a price, so
///    re-applying an update is harmless. Sequence checks live in the
///    reconciliation layer, not here.
///
/// # Thread Safety
///
/// This struct is `Send + Sync` but not internally synchronized. For
/// concurrent access, wrap in `parking_lot::RwLock` or `Arc<Mutex>`.
#[derive(Debug, Clone)]
pub struct Orderbook {
    /// Book identity
    key: BookKey,

    /// Bid levels: price -> amount
    /// Sorted ascending by price (best bid = highest = last)
    bids: BTreeMap<Decimal, Decimal>,

    /// Ask levels: price -> amount
    /// Sorted ascending by price (best ask = lowest = first)
    asks: BTreeMap<Decimal, Decimal>,

    /// Sequence number of the last snapshot or update applied
    last_update_id: UpdateId,

    /// Exchange time of the last snapshot or update applied
    last_updated: TimestampMs,
}

impl Orderbook {
    /// Create a new empty orderbook
    #[must_use]
    pub fn new(key: BookKey) -> Self {
        Self {
            key,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            last_updated: 0,
        }
    }

    /// Build a book straight from a snapshot
    #[must_use]
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut book = Self::new(snapshot.key());
        book.load_snapshot(snapshot);
        book
    }

    /// Get the book key
    #[must_use]
    pub fn key(&self) -> &BookKey {
        &self.key
    }

    /// Get the sequence number of the last applied snapshot or update
    #[must_use]
    pub const fn last_update_id(&self) -> UpdateId {
        self.last_update_id
    }

    /// Get the exchange time of the last applied snapshot or update
    #[must_use]
    pub const fn last_updated(&self) -> TimestampMs {
        self.last_updated
    }

    /// Replace the entire book with a snapshot
    pub fn load_snapshot(&mut self, snapshot: &Snapshot) {
        self.bids.clear();
        self.asks.clear();

        for level in &snapshot.bids {
            set_level(&mut self.bids, level);
        }
        for level in &snapshot.asks {
            set_level(&mut self.asks, level);
        }

        self.last_update_id = snapshot.last_update_id;
        self.last_updated = snapshot.update_time;
    }

    /// Apply an incremental update
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyUpdate`] if the update changes nothing and was
    /// not flagged with `allow_empty`.
    pub fn apply_update(&mut self, update: &Update) -> Result<(), Error> {
        if update.is_empty() && !update.allow_empty {
            return Err(Error::EmptyUpdate(update.update_id));
        }

        for level in &update.bids {
            set_level(&mut self.bids, level);
        }
        for level in &update.asks {
            set_level(&mut self.asks, level);
        }

        self.last_update_id = update.update_id;
        self.last_updated = update.update_time;
        Ok(())
    }

    /// Get the best bid (highest bid)
    ///
    /// Returns `(price, amount)` or `None` if no bids.
    #[must_use]
    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids.last_key_value().map(|(&p, &q)| (p, q))
    }

    /// Get the best ask (lowest ask)
    ///
    /// Returns `(price, amount)` or `None` if no asks.
    #[must_use]
    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks.first_key_value().map(|(&p, &q)| (p, q))
    }

    /// Get the mid price
    ///
    /// Returns the average of best bid and best ask, or `None` if either is missing.
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Get the spread
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some(ask - bid),
            _ => None,
        }
    }

    /// Check if the book is crossed (best bid >= best ask)
    ///
    /// This shouldn't happen in a healthy book and usually means it
    /// drifted from the exchange.
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => bid >= ask,
            _ => false,
        }
    }

    /// Get all bid levels, sorted by price descending (best first)
    pub fn bids(&self) -> impl Iterator<Item = Level> + '_ {
        self.bids.iter().rev().map(|(&p, &q)| Level::new(p, q))
    }

    /// Get all ask levels, sorted by price ascending (best first)
    pub fn asks(&self) -> impl Iterator<Item = Level> + '_ {
        self.asks.iter().map(|(&p, &q)| Level::new(p, q))
    }

    /// Get the top N bid levels
    #[must_use]
    pub fn top_bids(&self, n: usize) -> Vec<Level> {
        self.bids().take(n).collect()
    }

    /// Get the top N ask levels
    #[must_use]
    pub fn top_asks(&self, n: usize) -> Vec<Level> {
        self.asks().take(n).collect()
    }

    /// Get total bid amount
    #[must_use]
    pub fn total_bid_amount(&self) -> Decimal {
        self.bids.values().sum()
    }

    /// Get total ask amount
    #[must_use]
    pub fn total_ask_amount(&self) -> Decimal {
        self.asks.values().sum()
    }

    /// Clear all levels and forget the sequence number
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_update_id = 0;
        self.last_updated = 0;
    }

    /// Check if the orderbook is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Get the number of price levels as `(bids, asks)`
    #[must_use]
    pub fn num_levels(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }
}

fn set_level(side: &mut BTreeMap<Decimal, Decimal>, level: &Level) {
    if level.amount.is_zero() {
        side.remove(&level.price);
    } else {
        side.insert(level.price, level.amount);
    }
}

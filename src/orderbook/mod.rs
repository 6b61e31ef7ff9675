//! Order book storage and the reconciliation engine.
//!
//! - [`Orderbook`] - sorted price levels for one book
//! - [`BookStore`] / [`MemoryBookStore`] - where synchronised books live
//! - [`FanOut`] - mirrors the spot feed into margin and cross-margin books
//! - [`UpdateCache`] - per-book buffer used while bootstrapping
//! - [`SyncManager`] - the state machine every diff update goes through
//!
//! # Example
//!
//! ```rust
//! use orderbook_sync::orderbook::Orderbook;
//! use orderbook_sync::types::{Asset, Level, Pair, Snapshot, Update};
//! use rust_decimal::Decimal;
//!
//! let pair = Pair::new("BTC", "USDT");
//! let snapshot = Snapshot::new(pair.clone(), Asset::Spot, 10)
//!     .with_bids(vec![Level::new(Decimal::from(100), Decimal::ONE)]);
//! let mut book = Orderbook::from_snapshot(&snapshot);
//!
//! // Apply a diff
//! let update = Update::new(pair, Asset::Spot, 11)
//!     .with_bids(vec![Level::new(Decimal::from(101), Decimal::TWO)]);
//! book.apply_update(&update).unwrap();
//!
//! // Get best bid
//! if let Some((price, amount)) = book.best_bid() {
//!     println!("Best bid: {} @ {}", amount, price);
//! }
//! ```

pub mod book;
pub mod cache;
pub mod fanout;
pub mod fetch;
pub mod limits;
pub mod manager;
pub mod store;

pub use book::Orderbook;
pub use cache::{PendingUpdate, SyncEvent, SyncState, UpdateCache};
pub use fanout::{EnabledBooks, FanOut};
pub use fetch::{fetch_with_retry, SnapshotFetcher};
pub use limits::DepthLimits;
pub use manager::SyncManager;
pub use store::{BookStore, MemoryBookStore};

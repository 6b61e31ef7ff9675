//! # orderbook-sync
//!
//! Keeps local order books consistent with an exchange's websocket diff-depth
//! streams, bootstrapping each book from a REST snapshot.
//!
//! ## Features
//!
//! - **Buffered bootstrap** - diffs are queued while the snapshot is fetched,
//!   then replayed on top of it
//! - **Sequence checking** - every live diff must continue the book's sequence
//! - **Self-healing** - a gap desynchronises the book and the next diff
//!   starts a fresh bootstrap
//! - **Fan-out** - one spot feed drives the spot, margin and cross-margin books
//! - **Async/Await** - built on Tokio; one bootstrap task per book
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use orderbook_sync::{Config, SyncManager};
//! use orderbook_sync::client::{dispatch, DepthStream, DiffDepthParser, RestClient};
//! use orderbook_sync::config::SyncConfig;
//! use orderbook_sync::orderbook::MemoryBookStore;
//! use orderbook_sync::types::{Asset, Pair};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), orderbook_sync::Error> {
//!     let config = Config::new();
//!     let interval = Duration::from_millis(100);
//!
//!     let store = Arc::new(MemoryBookStore::new());
//!     let rest = Arc::new(RestClient::new(&config)?);
//!     let sync = SyncConfig::new().with_subscription(Asset::Spot, interval);
//!     let manager = SyncManager::new(sync, store.clone(), rest)?;
//!
//!     let mut ws = DepthStream::connect(&config).await?;
//!     ws.subscribe_order_book(Asset::Spot, &[Pair::new("BTC", "USDT")], interval).await?;
//!
//!     let parser = DiffDepthParser::for_asset(Asset::Spot)?;
//!     dispatch(ws.frames(), &parser, &manager).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! This crate is organized into several modules:
//!
//! - [`orderbook`] - Book storage, update caches and the [`SyncManager`]
//! - [`client`] - REST and WebSocket adapters for a Gate-style v4 API
//! - [`types`] - Pairs, assets, updates, snapshots and wire messages
//! - [`config`] - Endpoints, subscriptions and retry settings
//! - [`error`] - Error types for the crate
//!
//! ## Performance
//!
//! - `FxHashMap` for faster hashing of small keys
//! - `parking_lot` mutexes (faster than std), never held across `.await`
//! - One lock per book, so books never contend with each other
//! - `BTreeMap` for sorted price levels

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod orderbook;
pub mod types;

// Re-export main types at crate root for convenience
pub use config::{Config, SyncConfig};
pub use error::Error;
pub use orderbook::SyncManager;

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the orderbook-sync crate.
//!
//! This module defines the errors that can occur while reconciling order books,
//! including input validation failures, sequence problems detected during
//! replay, book store failures and transport errors from the REST and
//! WebSocket adapters.

use std::time::Duration;

use thiserror::Error;

use crate::orderbook::{SyncEvent, SyncState};
use crate::types::{Asset, BookKey, UpdateId};

/// The main error type for this crate
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration (missing fields, bad format)
    #[error("Configuration error: {0}")]
    Config(String),

    /// API returned an error response
    #[error("API error ({}): {}", .0.status, .0.message)]
    Api(ApiError),

    /// Rate limit exceeded
    #[error("Rate limited{}", retry_after_suffix(.retry_after_ms))]
    RateLimited {
        /// Retry after this many milliseconds
        retry_after_ms: Option<u64>,
    },

    /// WebSocket connection closed unexpectedly
    #[error("WebSocket connection closed")]
    ConnectionClosed,

    /// Update or snapshot carried an empty currency pair
    #[error("empty currency pair")]
    EmptyPair,

    /// Currency pair could not be parsed
    #[error("invalid currency pair: {0}")]
    InvalidPair(String),

    /// Asset class is not supported for order book syncing
    #[error("unsupported asset: {0}")]
    UnsupportedAsset(Asset),

    /// Subscription interval has no known snapshot depth for this asset
    #[error("unsupported update interval {interval:?} for asset {asset}")]
    UnsupportedInterval {
        /// Asset class of the subscription
        asset: Asset,
        /// Requested update interval
        interval: Duration,
    },

    /// Update arrived for an asset that has no configured depth limit
    #[error("asset {0} is not tracked by this manager")]
    AssetNotTracked(Asset),

    /// Incoming update did not continue the book's sequence
    #[error("Sequence gap: expected {expected}, got {got}")]
    SequenceGap {
        /// Next update id the book expected
        expected: UpdateId,
        /// First update id carried by the update
        got: UpdateId,
    },

    /// Book reached the largest representable sequence number
    #[error("sequence number {0} has no successor")]
    SequenceOverflow(UpdateId),

    /// State change not allowed from the book's current state
    #[error("cannot apply {event:?} to a book in state {from}")]
    InvalidTransition {
        /// State the book was in
        from: SyncState,
        /// Rejected event
        event: SyncEvent,
    },

    /// Snapshot is older than the oldest buffered update can repair
    #[error("orderbook snapshot is outdated: next expected {next_expected} but pending update starts at {first_update_id}")]
    SnapshotOutdated {
        /// Book's last update id plus one
        next_expected: UpdateId,
        /// First update id of the pending update that could not be applied
        first_update_id: UpdateId,
    },

    /// Replaying the buffer found nothing newer than the snapshot
    #[error("none of the {pending} pending updates were applied")]
    NoUpdatesApplied {
        /// Number of buffered updates inspected
        pending: usize,
    },

    /// No sub-book accepted a fanned-out operation
    #[error("no orderbook accepted the fan-out for {0}")]
    FanOutFailed(BookKey),

    /// Book store has no book for this key
    #[error("orderbook not found: {0}")]
    BookNotFound(BookKey),

    /// Book was invalidated and awaits a fresh snapshot
    #[error("orderbook invalid: {0}")]
    BookInvalid(BookKey),

    /// Update carried no levels and was not flagged as allowed to be empty
    #[error("update {0} has no bids or asks")]
    EmptyUpdate(UpdateId),

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,
}

fn retry_after_suffix(retry_after_ms: &Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!(", retry after {}ms", ms),
        None => String::new(),
    }
}

/// Error returned by an exchange REST API
#[derive(Debug, Clone)]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Error label from API (if provided)
    pub label: Option<String>,
    /// Error message
    pub message: String,
}

impl ApiError {
    /// Create a new API error
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            label: None,
            message: message.into(),
        }
    }

    /// Create an API error with an error label
    pub fn with_label(status: u16, label: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            label: Some(label.into()),
            message: message.into(),
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

impl Error {
    /// Whether a snapshot fetch failing with this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::RateLimited { .. } | Error::Timeout(_) => true,
            Error::Api(e) => e.is_server_error(),
            _ => false,
        }
    }
}

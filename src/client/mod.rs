//! Transport adapters for a Gate-style v4 exchange API.
//!
//! This module contains:
//!
//! - [`rest`] - HTTP client fetching order book snapshots
//! - [`websocket`] - diff-depth stream, frame parser and dispatch loop

pub mod rest;
pub mod websocket;

pub use rest::RestClient;
pub use websocket::{dispatch, DepthStream, DiffDepthParser, DispatchStats};

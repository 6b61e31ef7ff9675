//! Configuration for the transport adapters and the sync engine.
//!
//! - [`Config`] - REST/WebSocket endpoints and timeouts
//! - [`SyncConfig`] - subscriptions, enabled books and bootstrap timings
//! - [`RetryPolicy`] - backoff for snapshot fetches

use std::time::Duration;

use rand::Rng;
use rustc_hash::FxHashMap;

use crate::orderbook::fanout::EnabledBooks;
use crate::types::{Asset, Pair};

/// API environment (production or testnet)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Production environment
    #[default]
    Production,
    /// Testnet environment
    Testnet,
}

impl Environment {
    /// Get the base URL for REST API
    pub fn rest_base_url(&self) -> &'static str {
        match self {
            Environment::Production => "https://api.gateio.ws/api/v4",
            Environment::Testnet => "https://fx-api-testnet.gateio.ws/api/v4",
        }
    }

    /// Get the WebSocket URL
    pub fn websocket_url(&self) -> &'static str {
        match self {
            Environment::Production => "wss://api.gateio.ws/ws/v4/",
            Environment::Testnet => "wss://fx-ws-testnet.gateio.ws/v4/ws/usdt",
        }
    }
}

/// Endpoint configuration for [`RestClient`](crate::client::RestClient) and
/// [`DepthStream`](crate::client::DepthStream)
///
/// # Example
///
/// ```rust
/// use orderbook_sync::Config;
/// use orderbook_sync::config::Environment;
///
/// let config = Config::new()
///     .with_environment(Environment::Testnet)
///     .with_timeout(std::time::Duration::from_secs(30));
/// assert!(config.rest_base_url().contains("testnet"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// API environment
    environment: Environment,

    /// Overrides the environment's REST URL
    rest_base_url: Option<String>,

    /// Overrides the environment's WebSocket URL
    websocket_url: Option<String>,

    /// HTTP request timeout
    timeout: Option<Duration>,
}

impl Config {
    /// Production endpoints with a 10 second timeout
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the API environment (production or testnet)
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Point REST calls at a custom base URL
    #[must_use]
    pub fn with_rest_base_url(mut self, url: impl Into<String>) -> Self {
        self.rest_base_url = Some(url.into());
        self
    }

    /// Point the WebSocket at a custom URL
    #[must_use]
    pub fn with_websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = Some(url.into());
        self
    }

    /// Set the HTTP request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the environment
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Get the REST API base URL
    pub fn rest_base_url(&self) -> &str {
        self.rest_base_url
            .as_deref()
            .unwrap_or_else(|| self.environment.rest_base_url())
    }

    /// Get the WebSocket URL
    pub fn websocket_url(&self) -> &str {
        self.websocket_url
            .as_deref()
            .unwrap_or_else(|| self.environment.websocket_url())
    }

    /// Get the timeout duration
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(Duration::from_secs(10))
    }
}

/// Backoff applied between failed snapshot fetches
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of fetch attempts (0 = infinite)
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Maximum delay between attempts
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Fraction of the delay added as random jitter (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Create a retry policy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum attempts (0 = infinite)
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay in milliseconds
    pub fn initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    /// Set maximum delay in milliseconds
    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Set backoff multiplier
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter fraction, clamped to `0.0..=1.0`
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Whether another attempt is allowed after `attempts` have failed
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_retries == 0 || attempts < self.max_retries
    }

    /// Calculate delay for a given retry attempt, without jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(delay_ms)
    }

    /// Delay for `attempt` with up to `jitter` extra added at random
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let extra = base.as_secs_f64() * self.jitter * rand::thread_rng().gen_range(0.0..=1.0);
        base + Duration::from_secs_f64(extra)
    }
}

/// Settings for [`SyncManager`](crate::orderbook::SyncManager)
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use orderbook_sync::config::SyncConfig;
/// use orderbook_sync::types::Asset;
///
/// let config = SyncConfig::new()
///     .with_subscription(Asset::Spot, Duration::from_millis(100))
///     .with_enabled_asset(Asset::Margin)
///     .with_start_delay(Duration::from_secs(1));
/// assert_eq!(config.subscriptions().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Order book channel update interval per subscribed asset
    subscriptions: FxHashMap<Asset, Duration>,

    /// Books that receive snapshots and updates
    enabled: EnabledBooks,

    /// Pause before fetching a snapshot so the buffer can fill
    start_delay: Duration,

    /// Upper bound on waiting for the buffer to reach the snapshot
    sync_deadline: Duration,

    /// Snapshot fetch backoff
    retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            subscriptions: FxHashMap::default(),
            enabled: EnabledBooks::default(),
            start_delay: Duration::from_secs(2),
            sync_deadline: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Create a config with no subscriptions and default timings
    pub fn new() -> Self {
        Self::default()
    }

    /// Track order books for `asset`, fed at `interval`
    ///
    /// The asset's books are enabled for all pairs.
    #[must_use]
    pub fn with_subscription(mut self, asset: Asset, interval: Duration) -> Self {
        self.subscriptions.insert(asset, interval);
        self.enabled.enable_asset(asset);
        self
    }

    /// Enable every book of `asset`, e.g. margin books fed by the spot stream
    #[must_use]
    pub fn with_enabled_asset(mut self, asset: Asset) -> Self {
        self.enabled.enable_asset(asset);
        self
    }

    /// Enable a single pair of `asset`
    #[must_use]
    pub fn with_enabled_pair(mut self, asset: Asset, pair: Pair) -> Self {
        self.enabled.enable_pair(asset, pair);
        self
    }

    /// Set the delay before fetching a snapshot
    #[must_use]
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Set the deadline for the buffer to catch up with a snapshot
    #[must_use]
    pub fn with_sync_deadline(mut self, deadline: Duration) -> Self {
        self.sync_deadline = deadline;
        self
    }

    /// Set the snapshot fetch retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Subscribed assets and their update intervals
    pub fn subscriptions(&self) -> &FxHashMap<Asset, Duration> {
        &self.subscriptions
    }

    /// Enabled books
    pub fn enabled(&self) -> &EnabledBooks {
        &self.enabled
    }

    /// Delay before fetching a snapshot
    pub fn start_delay(&self) -> Duration {
        self.start_delay
    }

    /// Deadline for the buffer to catch up with a snapshot
    pub fn sync_deadline(&self) -> Duration {
        self.sync_deadline
    }

    /// Snapshot fetch retry policy
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}

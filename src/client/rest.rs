//! HTTP REST client for order book snapshots.
//!
//! This module provides the [`RestClient`] used by the bootstrap task to fetch
//! full order books. It only needs public endpoints, so requests are unsigned.
//!
//! # Example
//!
//! ```rust,no_run
//! use orderbook_sync::Config;
//! use orderbook_sync::client::RestClient;
//! use orderbook_sync::orderbook::SnapshotFetcher;
//! use orderbook_sync::types::{Asset, Pair};
//!
//! # async fn example() -> orderbook_sync::Result<()> {
//! let rest = RestClient::new(&Config::new())?;
//! let snapshot = rest
//!     .fetch_orderbook(&Pair::new("BTC", "USDT"), Asset::Spot, 100)
//!     .await?;
//! println!("snapshot at {}", snapshot.last_update_id);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::{ApiError, Error};
use crate::orderbook::SnapshotFetcher;
use crate::types::messages::OrderBookResponse;
use crate::types::{Asset, Level, Pair, Snapshot};

/// HTTP client for the exchange REST API
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
}

impl RestClient {
    /// Create a new REST client
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            base_url: config.rest_base_url().trim_end_matches('/').to_string(),
        })
    }

    /// Make a GET request to the API
    ///
    /// # Arguments
    ///
    /// * `path` - API path (without base URL)
    /// * `query` - Query string parameters
    ///
    /// # Returns
    ///
    /// Deserialized response body
    pub async fn get<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| Error::Config(format!("invalid URL for {path}: {e}")))?;
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));

        let response = self
            .client
            .get(url)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle the HTTP response, checking for errors
    async fn handle_response<T>(&self, response: reqwest::Response) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();

        // Check for rate limiting
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1000);

            return Err(Error::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        // Check for errors
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            // Try to parse as API error
            if let Ok(error_response) = serde_json::from_str::<serde_json::Value>(&body) {
                let message = error_response
                    .get("message")
                    .or_else(|| error_response.get("detail"))
                    .and_then(|v| v.as_str())
                    .unwrap_or(&body)
                    .to_string();

                let label = error_response
                    .get("label")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());

                return Err(Error::Api(ApiError {
                    status: status.as_u16(),
                    label,
                    message,
                }));
            }

            return Err(Error::Api(ApiError::new(status.as_u16(), body)));
        }

        // Deserialize successful response
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(Error::from)
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Order book endpoint and the name of its market parameter for `asset`
fn order_book_endpoint(asset: Asset) -> Result<(&'static str, &'static str), Error> {
    match asset {
        Asset::Spot | Asset::Margin | Asset::CrossMargin => {
            Ok(("/spot/order_book", "currency_pair"))
        }
        Asset::UsdtMarginedFutures => Ok(("/futures/usdt/order_book", "contract")),
        Asset::CoinMarginedFutures => Ok(("/futures/btc/order_book", "contract")),
        Asset::DeliveryFutures => Ok(("/delivery/usdt/order_book", "contract")),
        Asset::Options => Err(Error::UnsupportedAsset(asset)),
    }
}

fn into_snapshot(pair: &Pair, asset: Asset, resp: OrderBookResponse) -> Snapshot {
    let update_time = resp.time_ms();
    Snapshot {
        pair: pair.clone(),
        asset,
        last_update_id: resp.id,
        update_time,
        bids: resp.bids.into_iter().map(Level::from).collect(),
        asks: resp.asks.into_iter().map(Level::from).collect(),
    }
}

#[async_trait]
impl SnapshotFetcher for RestClient {
    async fn fetch_orderbook(
        &self,
        pair: &Pair,
        asset: Asset,
        depth: usize,
    ) -> Result<Snapshot, Error> {
        let (path, market_param) = order_book_endpoint(asset)?;
        let query = [
            (market_param, pair.to_string()),
            ("limit", depth.to_string()),
            ("with_id", "true".to_string()),
        ];

        let resp: OrderBookResponse = self.get(path, &query).await?;
        debug!(
            %pair,
            %asset,
            id = resp.id,
            bids = resp.bids.len(),
            asks = resp.asks.len(),
            "fetched order book snapshot"
        );
        Ok(into_snapshot(pair, asset, resp))
    }
}

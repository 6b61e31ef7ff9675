//! Asset classes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Market type a book belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Asset {
    /// Spot market
    Spot,
    /// Isolated margin, mirrors the spot feed
    Margin,
    /// Cross margin, mirrors the spot feed
    CrossMargin,
    /// USDT-settled perpetual futures
    UsdtMarginedFutures,
    /// Coin-settled perpetual futures
    CoinMarginedFutures,
    /// Dated delivery futures
    DeliveryFutures,
    /// Options
    Options,
}

impl Asset {
    /// Every asset class, in declaration order
    pub const ALL: [Asset; 7] = [
        Asset::Spot,
        Asset::Margin,
        Asset::CrossMargin,
        Asset::UsdtMarginedFutures,
        Asset::CoinMarginedFutures,
        Asset::DeliveryFutures,
        Asset::Options,
    ];

    /// Assets whose books are all driven by the single spot feed
    pub const SPOT_LIKE: [Asset; 3] = [Asset::Spot, Asset::Margin, Asset::CrossMargin];

    /// Whether this asset shares the spot order book feed
    pub fn is_spot_like(self) -> bool {
        matches!(self, Asset::Spot | Asset::Margin | Asset::CrossMargin)
    }

    /// Whether this asset is a futures contract
    pub fn is_futures(self) -> bool {
        matches!(
            self,
            Asset::UsdtMarginedFutures | Asset::CoinMarginedFutures | Asset::DeliveryFutures
        )
    }

    /// Stable lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Asset::Spot => "spot",
            Asset::Margin => "margin",
            Asset::CrossMargin => "cross_margin",
            Asset::UsdtMarginedFutures => "usdt_margined_futures",
            Asset::CoinMarginedFutures => "coin_margined_futures",
            Asset::DeliveryFutures => "delivery_futures",
            Asset::Options => "options",
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Asset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Asset::ALL
            .into_iter()
            .find(|a| a.as_str() == lower)
            .ok_or_else(|| Error::Config(format!("unknown asset: {}", s)))
    }
}

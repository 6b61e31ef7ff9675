//! Currency pairs and book keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Asset;
use crate::error::Error;

/// A base/quote currency pair, e.g. `BTC_USDT`
///
/// Currency codes are stored upper-cased so that `btc_usdt` and `BTC-USDT`
/// refer to the same market.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pair {
    /// Base currency
    pub base: String,
    /// Quote currency
    pub quote: String,
}

impl Pair {
    /// Create a pair from its two currency codes
    pub fn new(base: impl AsRef<str>, quote: impl AsRef<str>) -> Self {
        Self {
            base: base.as_ref().trim().to_ascii_uppercase(),
            quote: quote.as_ref().trim().to_ascii_uppercase(),
        }
    }

    /// Whether either side of the pair is missing
    pub fn is_empty(&self) -> bool {
        self.base.is_empty() || self.quote.is_empty()
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.base, self.quote)
    }
}

impl FromStr for Pair {
    type Err = Error;

    /// Parse `BASE_QUOTE`, `BASE-QUOTE` or `BASE/QUOTE`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once(['_', '-', '/'])
            .ok_or_else(|| Error::InvalidPair(s.to_string()))?;
        let pair = Pair::new(base, quote);
        if pair.is_empty() {
            return Err(Error::InvalidPair(s.to_string()));
        }
        Ok(pair)
    }
}

/// Identifies one tracked order book: a pair within an asset class
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BookKey {
    /// Base currency
    pub base: String,
    /// Quote currency
    pub quote: String,
    /// Asset class
    pub asset: Asset,
}

impl BookKey {
    /// Build the key for `pair` in `asset`
    pub fn new(pair: &Pair, asset: Asset) -> Self {
        Self {
            base: pair.base.clone(),
            quote: pair.quote.clone(),
            asset,
        }
    }

    /// The currency pair this key refers to
    pub fn pair(&self) -> Pair {
        Pair {
            base: self.base.clone(),
            quote: self.quote.clone(),
        }
    }

    /// Same pair, different asset class
    #[must_use]
    pub fn with_asset(&self, asset: Asset) -> Self {
        Self {
            base: self.base.clone(),
            quote: self.quote.clone(),
            asset,
        }
    }
}

impl fmt::Display for BookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{} {}", self.base, self.quote, self.asset)
    }
}

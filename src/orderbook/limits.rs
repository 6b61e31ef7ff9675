//! Snapshot depth per asset class.
//!
//! A diff channel only ever touches the top N levels of a book, where N is
//! fixed by the channel's update interval. Snapshots must be fetched at that
//! same depth or the book keeps levels the stream will never remove.

use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::error::Error;
use crate::types::Asset;

/// Resolved snapshot depth for every tracked asset
#[derive(Debug, Clone, Default)]
pub struct DepthLimits {
    limits: FxHashMap<Asset, usize>,
}

impl DepthLimits {
    /// Resolve depths for `(asset, update interval)` subscriptions
    ///
    /// A spot subscription also covers margin and cross-margin, which are fed
    /// by the same stream.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedAsset`] for assets without a diff-depth channel and
    /// [`Error::UnsupportedInterval`] for intervals the channel does not offer.
    pub fn resolve<'a, I>(subscriptions: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (&'a Asset, &'a Duration)>,
    {
        let mut limits = FxHashMap::default();
        for (&asset, &interval) in subscriptions {
            let depth = depth_for(asset, interval)?;
            if asset.is_spot_like() {
                for a in Asset::SPOT_LIKE {
                    limits.insert(a, depth);
                }
            } else {
                limits.insert(asset, depth);
            }
        }
        Ok(Self { limits })
    }

    /// Snapshot depth for `asset`
    ///
    /// # Errors
    ///
    /// [`Error::AssetNotTracked`] if no subscription covers `asset`.
    pub fn limit(&self, asset: Asset) -> Result<usize, Error> {
        self.limits
            .get(&asset)
            .copied()
            .ok_or(Error::AssetNotTracked(asset))
    }

    /// Whether `asset` has a resolved depth
    pub fn contains(&self, asset: Asset) -> bool {
        self.limits.contains_key(&asset)
    }
}

fn depth_for(asset: Asset, interval: Duration) -> Result<usize, Error> {
    let unsupported = || Error::UnsupportedInterval { asset, interval };
    match asset {
        Asset::Spot
        | Asset::Margin
        | Asset::CrossMargin
        | Asset::UsdtMarginedFutures
        | Asset::CoinMarginedFutures => match interval.as_millis() {
            20 => Ok(20),
            100 => Ok(100),
            _ => Err(unsupported()),
        },
        Asset::DeliveryFutures => match interval.as_millis() {
            100 | 1000 => Ok(100),
            _ => Err(unsupported()),
        },
        Asset::Options => Err(Error::UnsupportedAsset(asset)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_spot_covers_margin() {
        let subs = [(Asset::Spot, ms(100))];
        let limits = DepthLimits::resolve(subs.iter().map(|(a, d)| (a, d))).unwrap();
        assert_eq!(limits.limit(Asset::Spot).unwrap(), 100);
        assert_eq!(limits.limit(Asset::CrossMargin).unwrap(), 100);
        assert!(matches!(
            limits.limit(Asset::UsdtMarginedFutures),
            Err(Error::AssetNotTracked(Asset::UsdtMarginedFutures))
        ));
    }

    #[test]
    fn test_futures_intervals() {
        let subs = [
            (Asset::UsdtMarginedFutures, ms(20)),
            (Asset::DeliveryFutures, ms(1000)),
        ];
        let limits = DepthLimits::resolve(subs.iter().map(|(a, d)| (a, d))).unwrap();
        assert_eq!(limits.limit(Asset::UsdtMarginedFutures).unwrap(), 20);
        assert_eq!(limits.limit(Asset::DeliveryFutures).unwrap(), 100);
        assert!(!limits.contains(Asset::Spot));
    }

    #[test]
    fn test_unsupported_configuration() {
        let subs = [(Asset::Options, ms(100))];
        assert!(matches!(
            DepthLimits::resolve(subs.iter().map(|(a, d)| (a, d))),
            Err(Error::UnsupportedAsset(Asset::Options))
        ));

        let subs = [(Asset::Spot, ms(1000))];
        assert!(matches!(
            DepthLimits::resolve(subs.iter().map(|(a, d)| (a, d))),
            Err(Error::UnsupportedInterval { asset: Asset::Spot, .. })
        ));
    }
}

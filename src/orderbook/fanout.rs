//! Mirroring one feed into every book that shares it.
//!
//! Spot, margin and cross-margin books of a pair are all driven by the single
//! spot order book channel. [`FanOut`] takes a spot snapshot or update and
//! applies a copy to each enabled sibling book. A partial success is normal
//! (a pair may not be listed for margin); only a complete miss is an error.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::error::Error;
use crate::types::{Asset, BookKey, Pair, Snapshot, Update, UpdateId};

use super::BookStore;

/// Which books are enabled, per asset
///
/// An asset is either enabled for every pair or for an explicit set of pairs.
#[derive(Debug, Clone, Default)]
pub struct EnabledBooks {
    assets: FxHashMap<Asset, Option<FxHashSet<Pair>>>,
}

impl EnabledBooks {
    /// Nothing enabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable every pair of `asset`
    pub fn enable_asset(&mut self, asset: Asset) {
        self.assets.insert(asset, None);
    }

    /// Enable one pair of `asset`
    ///
    /// Has no effect if the whole asset is already enabled.
    pub fn enable_pair(&mut self, asset: Asset, pair: Pair) {
        if let Some(pairs) = self
            .assets
            .entry(asset)
            .or_insert_with(|| Some(FxHashSet::default()))
        {
            pairs.insert(pair);
        }
    }

    /// Whether `pair` is enabled for `asset`
    pub fn is_enabled(&self, asset: Asset, pair: &Pair) -> bool {
        match self.assets.get(&asset) {
            Some(None) => true,
            Some(Some(pairs)) => pairs.contains(pair),
            None => false,
        }
    }
}

/// Applies snapshots and updates to every enabled book sharing a feed
pub struct FanOut {
    store: Arc<dyn BookStore>,
    enabled: EnabledBooks,
}

impl std::fmt::Debug for FanOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOut")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl FanOut {
    /// Fan out into `store`, restricted to `enabled` books
    pub fn new(store: Arc<dyn BookStore>, enabled: EnabledBooks) -> Self {
        Self { store, enabled }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn BookStore> {
        &self.store
    }

    /// Books fed by the stream for `key`
    ///
    /// A spot key yields the enabled spot, margin and cross-margin books of
    /// the pair; any other key yields itself when enabled.
    pub fn targets(&self, key: &BookKey) -> Vec<BookKey> {
        let pair = key.pair();
        if key.asset == Asset::Spot {
            Asset::SPOT_LIKE
                .into_iter()
                .filter(|a| self.enabled.is_enabled(*a, &pair))
                .map(|a| key.with_asset(a))
                .collect()
        } else if self.enabled.is_enabled(key.asset, &pair) {
            vec![key.clone()]
        } else {
            Vec::new()
        }
    }

    /// Sequence number of the primary book fed by `key`
    pub fn last_update_id(&self, key: &BookKey) -> Result<UpdateId, Error> {
        let primary = self
            .targets(key)
            .into_iter()
            .next()
            .ok_or_else(|| Error::FanOutFailed(key.clone()))?;
        self.store.last_update_id(&primary)
    }

    /// Load `snapshot` into every target book
    ///
    /// # Errors
    ///
    /// The store's error when there is a single target, otherwise
    /// [`Error::FanOutFailed`] when no target accepted the snapshot.
    pub fn load_snapshot(&self, snapshot: &Snapshot) -> Result<(), Error> {
        let key = snapshot.key();
        self.each_target(&key, |target| {
            if target.asset == snapshot.asset {
                return self.store.load_snapshot(snapshot);
            }
            let mut copy = snapshot.clone();
            copy.asset = target.asset;
            self.store.load_snapshot(&copy)
        })
    }

    /// Apply `update` to every target book
    ///
    /// # Errors
    ///
    /// The store's error when there is a single target, otherwise
    /// [`Error::FanOutFailed`] when no target accepted the update.
    pub fn apply(&self, update: &Update) -> Result<(), Error> {
        let key = update.key();
        self.each_target(&key, |target| {
            if target.asset == update.asset {
                return self.store.update(update);
            }
            let mut copy = update.clone();
            copy.asset = target.asset;
            self.store.update(&copy)
        })
    }

    /// Invalidate every target book
    ///
    /// Books that were never loaded are skipped: there is nothing to distrust.
    pub fn invalidate(&self, key: &BookKey) -> Result<(), Error> {
        for target in self.targets(key) {
            match self.store.invalidate(&target) {
                Ok(()) | Err(Error::BookNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn each_target(
        &self,
        key: &BookKey,
        mut op: impl FnMut(&BookKey) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let targets = self.targets(key);
        if targets.len() == 1 {
            return op(&targets[0]);
        }

        let mut applied = 0;
        for target in &targets {
            match op(target) {
                Ok(()) => applied += 1,
                Err(e) => warn!(book = %target, error = %e, "fan-out to book failed"),
            }
        }
        if applied == 0 {
            return Err(Error::FanOutFailed(key.clone()));
        }
        debug!(book = %key, applied, targets = targets.len(), "fanned out");
        Ok(())
    }
}

//! Reconciliation of websocket diff streams with REST snapshots.
//!
//! This module provides [`SyncManager`], the entry point for every incoming
//! order book diff. It keeps one [`UpdateCache`] per book and drives it
//! through its lifecycle:
//!
//! ```text
//! Initialised --first update--> QueuingUpdates --bootstrap ok--> Synchronised
//!      ^                              |                               |
//!      |                        bootstrap failed                  sequence gap
//!      |                              v                               |
//!      +------next update------ Desynchronised <----------------------+
//! ```
//!
//! # Sequence Tracking
//!
//! Once synchronised, an update is applied only if its first id is exactly
//! one past the book's last id. Anything else marks the book desynchronised;
//! the next update for it invalidates the stored book and starts a new
//! bootstrap, so the stream heals itself without caller involvement.

use std::future::Future;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::SyncConfig;
use crate::error::Error;
use crate::types::{BookKey, Update, UpdateId};

use super::cache::{next_update_id, CacheInner};
use super::fetch::fetch_with_retry;
use super::{BookStore, DepthLimits, FanOut, SnapshotFetcher, SyncEvent, SyncState, UpdateCache};

/// Registry entry: a book's cache and its bootstrap task
#[derive(Debug)]
struct CacheSlot {
    cache: Arc<UpdateCache>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Keeps local order books in step with an exchange's diff streams.
///
/// Feed every diff message to [`process_orderbook_update`]. The first update
/// for a book launches a background bootstrap task which fetches a snapshot,
/// waits for the buffered stream to catch up with it, then replays the buffer
/// on top. Later updates are checked for continuity and applied directly.
///
/// # Thread Safety
///
/// The manager is safe to share across tasks via `Arc<SyncManager>`. The
/// registry lock is only held to find or create a book's cache and is
/// released before the cache's own lock is taken, so callers working on
/// different books never wait on each other.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use orderbook_sync::{Config, SyncManager};
/// use orderbook_sync::client::RestClient;
/// use orderbook_sync::config::SyncConfig;
/// use orderbook_sync::orderbook::MemoryBookStore;
/// use orderbook_sync::types::{Asset, Pair, Update};
///
/// # async fn example() -> orderbook_sync::Result<()> {
/// let config = SyncConfig::new().with_subscription(Asset::Spot, Duration::from_millis(100));
/// let store = Arc::new(MemoryBookStore::new());
/// let rest = Arc::new(RestClient::new(&Config::new())?);
/// let manager = SyncManager::new(config, store.clone(), rest)?;
///
/// // In your WebSocket loop:
/// let update = Update::new(Pair::new("BTC", "USDT"), Asset::Spot, 1001);
/// manager.process_orderbook_update(1000, update)?;
/// # Ok(())
/// # }
/// ```
///
/// [`process_orderbook_update`]: SyncManager::process_orderbook_update
pub struct SyncManager {
    /// Update caches by book
    caches: RwLock<FxHashMap<BookKey, Arc<CacheSlot>>>,
    fanout: Arc<FanOut>,
    fetcher: Arc<dyn SnapshotFetcher>,
    limits: DepthLimits,
    config: SyncConfig,
    /// Parent of every slot's token
    shutdown: CancellationToken,
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("books", &self.len())
            .field("limits", &self.limits)
            .field("fanout", &self.fanout)
            .finish_non_exhaustive()
    }
}

impl SyncManager {
    /// Create a manager writing to `store` and bootstrapping from `fetcher`
    ///
    /// # Errors
    ///
    /// Returns an error if a subscription uses an asset or interval with no
    /// known snapshot depth.
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn BookStore>,
        fetcher: Arc<dyn SnapshotFetcher>,
    ) -> Result<Self, Error> {
        let limits = DepthLimits::resolve(config.subscriptions().iter())?;
        let fanout = Arc::new(FanOut::new(store, config.enabled().clone()));
        Ok(Self {
            caches: RwLock::new(FxHashMap::default()),
            fanout,
            fetcher,
            limits,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Handle one diff message covering ids `first_update_id..=update.update_id`
    ///
    /// Must be called from within a Tokio runtime: the first update for a
    /// book spawns its bootstrap task.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyPair`] / [`Error::AssetNotTracked`] for updates that
    ///   can never belong to a tracked book
    /// - [`Error::SequenceGap`] when a synchronised book misses an update;
    ///   the book is desynchronised and heals on the next update
    /// - [`Error::SequenceOverflow`] when a synchronised book already holds
    ///   the last representable id; handled like a gap
    /// - any store error while applying to a synchronised book
    pub fn process_orderbook_update(
        &self,
        first_update_id: UpdateId,
        update: Update,
    ) -> Result<(), Error> {
        if update.pair.is_empty() {
            return Err(Error::EmptyPair);
        }
        let depth = self.limits.limit(update.asset)?;

        let key = update.key();
        let slot = self.slot(&key);
        let mut inner = slot.cache.lock();

        match inner.state() {
            SyncState::Initialised => {
                self.start_bootstrap(&slot, &mut inner, depth, first_update_id, update)
            }
            SyncState::QueuingUpdates => {
                let update_id = update.update_id;
                inner.enqueue_update(update, first_update_id);
                slot.cache.notify_latest(update_id);
                Ok(())
            }
            SyncState::Synchronised => self.apply_live(&mut inner, &key, first_update_id, &update),
            SyncState::Desynchronised => {
                slot.cache.clear_locked(&mut inner);
                self.fanout.invalidate(&key)?;
                inner.transition(SyncEvent::Reset)?;
                debug!(book = %key, "book invalidated, bootstrapping again");
                self.start_bootstrap(&slot, &mut inner, depth, first_update_id, update)
            }
        }
    }

    /// Get the state of a book, if any update for it was seen
    pub fn state(&self, key: &BookKey) -> Option<SyncState> {
        let slot = self.caches.read().get(key).cloned();
        slot.map(|s| s.cache.state())
    }

    /// Get the number of updates buffered for a book
    pub fn pending_len(&self, key: &BookKey) -> Option<usize> {
        let slot = self.caches.read().get(key).cloned();
        slot.map(|s| s.cache.pending_len())
    }

    /// Get all books that are not currently being kept in sync
    pub fn books_needing_resync(&self) -> Vec<BookKey> {
        let slots: Vec<_> = self.caches.read().values().cloned().collect();
        slots
            .into_iter()
            .filter(|s| s.cache.state().needs_resync())
            .map(|s| s.cache.key().clone())
            .collect()
    }

    /// Get all book keys seen so far
    pub fn keys(&self) -> Vec<BookKey> {
        self.caches.read().keys().cloned().collect()
    }

    /// Get number of tracked books
    pub fn len(&self) -> usize {
        self.caches.read().len()
    }

    /// Check if no update has been seen yet
    pub fn is_empty(&self) -> bool {
        self.caches.read().is_empty()
    }

    /// Resolved snapshot depths
    pub fn depth_limits(&self) -> &DepthLimits {
        &self.limits
    }

    /// Fan-out in front of the book store
    pub fn fanout(&self) -> &FanOut {
        &self.fanout
    }

    /// Wait for the book's in-flight bootstrap task, if any
    ///
    /// Returns `false` when there was no task to wait for.
    pub async fn wait_for_bootstrap(&self, key: &BookKey) -> bool {
        let slot = self.caches.read().get(key).cloned();
        let Some(slot) = slot else {
            return false;
        };
        let handle = slot.task.lock().take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    warn!(book = %key, error = %e, "bootstrap task panicked");
                }
                true
            }
            None => false,
        }
    }

    /// Cancel every bootstrap task and wait for them to finish
    ///
    /// Cancelled books end up desynchronised.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let slots: Vec<_> = self.caches.read().values().cloned().collect();
        for slot in slots {
            let handle = slot.task.lock().take();
            if let Some(handle) = handle {
                if let Err(e) = handle.await {
                    warn!(book = %slot.cache.key(), error = %e, "bootstrap task panicked");
                }
            }
        }
        info!(books = self.len(), "sync manager shut down");
    }

    fn slot(&self, key: &BookKey) -> Arc<CacheSlot> {
        if let Some(slot) = self.caches.read().get(key) {
            return slot.clone();
        }
        let mut caches = self.caches.write();
        caches
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(CacheSlot {
                    cache: Arc::new(UpdateCache::new(key.clone())),
                    cancel: self.shutdown.child_token(),
                    task: Mutex::new(None),
                })
            })
            .clone()
    }

    fn apply_live(
        &self,
        inner: &mut CacheInner,
        key: &BookKey,
        first_update_id: UpdateId,
        update: &Update,
    ) -> Result<(), Error> {
        let next = match self.fanout.last_update_id(key).and_then(next_update_id) {
            Ok(next) => next,
            Err(e) => {
                inner.transition(SyncEvent::Desynchronised)?;
                warn!(book = %key, error = %e, "cannot determine next update id");
                return Err(e);
            }
        };

        if update.update_id < next {
            debug!(book = %key, update_id = update.update_id, next, "dropping duplicate update");
            return Ok(());
        }
        if first_update_id != next {
            inner.transition(SyncEvent::Desynchronised)?;
            warn!(book = %key, expected = next, got = first_update_id, "sequence gap");
            return Err(Error::SequenceGap {
                expected: next,
                got: first_update_id,
            });
        }

        if let Err(e) = self.fanout.apply(update) {
            inner.transition(SyncEvent::Desynchronised)?;
            warn!(book = %key, error = %e, "failed to apply update");
            return Err(e);
        }
        Ok(())
    }

    fn start_bootstrap(
        &self,
        slot: &CacheSlot,
        inner: &mut CacheInner,
        depth: usize,
        first_update_id: UpdateId,
        update: Update,
    ) -> Result<(), Error> {
        let runtime = Handle::try_current().map_err(|_| {
            Error::Config("order book updates must be processed inside a Tokio runtime".into())
        })?;

        inner.transition(SyncEvent::BootstrapStarted)?;
        let update_id = update.update_id;
        inner.enqueue_update(update, first_update_id);
        slot.cache.notify_latest(update_id);

        let handle = runtime.spawn(self.bootstrap(slot, depth));
        *slot.task.lock() = Some(handle);
        info!(book = %slot.cache.key(), depth, first_update_id, "bootstrapping order book");
        Ok(())
    }

    fn bootstrap(&self, slot: &CacheSlot, depth: usize) -> impl Future<Output = ()> + Send + 'static {
        let cache = slot.cache.clone();
        let cancel = slot.cancel.clone();
        let fanout = self.fanout.clone();
        let fetcher = self.fetcher.clone();
        let retry = self.config.retry().clone();
        let start_delay = self.config.start_delay();
        let deadline = self.config.sync_deadline();

        let key = cache.key().clone();
        let span = info_span!("bootstrap", pair = %key.pair(), asset = %key.asset);
        async move {
            let pair = key.pair();
            let snapshot = fetch_with_retry(fetcher.as_ref(), &pair, key.asset, depth, &retry, &cancel);
            match cache
                .sync_orderbook(&cancel, &fanout, snapshot, start_delay, deadline)
                .await
            {
                Ok(()) => debug!("bootstrap complete"),
                Err(e) => warn!(error = %e, "bootstrap failed, waiting for next update"),
            }
        }
        .instrument(span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::MemoryBookStore;
    use crate::types::{Asset, Pair, Snapshot};
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedSnapshot(UpdateId);

    #[async_trait]
    impl SnapshotFetcher for FixedSnapshot {
        async fn fetch_orderbook(
            &self,
            pair: &Pair,
            asset: Asset,
            _depth: usize,
        ) -> Result<Snapshot, Error> {
            Ok(Snapshot::new(pair.clone(), asset, self.0))
        }
    }

    fn manager() -> SyncManager {
        let config = SyncConfig::new()
            .with_subscription(Asset::Spot, Duration::from_millis(100))
            .with_start_delay(Duration::ZERO)
            .with_sync_deadline(Duration::from_secs(5));
        SyncManager::new(
            config,
            Arc::new(MemoryBookStore::new()),
            Arc::new(FixedSnapshot(10)),
        )
        .unwrap()
    }

    fn btc(id: UpdateId) -> Update {
        Update::new(Pair::new("BTC", "USDT"), Asset::Spot, id).allow_empty()
    }

    #[test]
    fn test_new_rejects_unsupported_subscription() {
        let config = SyncConfig::new().with_subscription(Asset::Options, Duration::from_millis(100));
        let result = SyncManager::new(
            config,
            Arc::new(MemoryBookStore::new()),
            Arc::new(FixedSnapshot(1)),
        );
        assert!(matches!(result, Err(Error::UnsupportedAsset(Asset::Options))));
    }

    #[test]
    fn test_rejects_invalid_updates() {
        let manager = manager();

        let empty = Update::new(Pair::new("", ""), Asset::Spot, 1);
        assert!(matches!(
            manager.process_orderbook_update(1, empty),
            Err(Error::EmptyPair)
        ));

        let futures = Update::new(Pair::new("BTC", "USDT"), Asset::UsdtMarginedFutures, 1);
        assert!(matches!(
            manager.process_orderbook_update(1, futures),
            Err(Error::AssetNotTracked(Asset::UsdtMarginedFutures))
        ));

        assert!(manager.is_empty());
    }

    #[test]
    fn test_requires_runtime() {
        let manager = manager();
        let update = btc(11);
        let key = update.key();

        assert!(matches!(
            manager.process_orderbook_update(11, update),
            Err(Error::Config(_))
        ));
        assert_eq!(manager.state(&key), Some(SyncState::Initialised));
        assert_eq!(manager.pending_len(&key), Some(0));
        assert_eq!(manager.books_needing_resync(), vec![key]);
    }

    #[tokio::test]
    async fn test_first_update_starts_bootstrap() {
        let manager = manager();
        let key = btc(11).key();

        manager.process_orderbook_update(9, btc(11)).unwrap();
        assert_eq!(manager.state(&key), Some(SyncState::QueuingUpdates));
        assert_eq!(manager.len(), 1);
        assert!(manager.books_needing_resync().is_empty());

        assert!(manager.wait_for_bootstrap(&key).await);
        assert_eq!(manager.state(&key), Some(SyncState::Synchronised));
        assert_eq!(manager.fanout().last_update_id(&key).unwrap(), 11);
        assert!(!manager.wait_for_bootstrap(&key).await);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_bootstrap() {
        let config = SyncConfig::new()
            .with_subscription(Asset::Spot, Duration::from_millis(100))
            .with_start_delay(Duration::from_secs(3600));
        let manager = SyncManager::new(
            config,
            Arc::new(MemoryBookStore::new()),
            Arc::new(FixedSnapshot(10)),
        )
        .unwrap();

        let key = btc(11).key();
        manager.process_orderbook_update(11, btc(11)).unwrap();
        manager.shutdown().await;

        assert_eq!(manager.state(&key), Some(SyncState::Desynchronised));
        assert_eq!(manager.pending_len(&key), Some(0));
    }
}

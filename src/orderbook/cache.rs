//! Per-book buffer of diff updates and its synchronisation state.
//!
//! While a snapshot is being fetched, updates for the book pile up in an
//! [`UpdateCache`]. Once the snapshot arrives and the buffer has caught up
//! with it, the snapshot is loaded and the buffered updates replayed on top.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::types::{BookKey, Snapshot, Update, UpdateId};

use super::FanOut;

/// Where a book is in its bootstrap lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncState {
    /// No update seen yet
    #[default]
    Initialised,
    /// A bootstrap task is running and updates are being buffered
    QueuingUpdates,
    /// The book is live and updates go straight to the store
    Synchronised,
    /// The book drifted; the next update starts over
    Desynchronised,
}

impl SyncState {
    /// Whether the book is not currently being kept up to date
    pub fn needs_resync(&self) -> bool {
        matches!(self, SyncState::Initialised | SyncState::Desynchronised)
    }

    /// State reached from `self` on `event`, or `None` if the move is illegal
    ///
    /// A book can be desynchronised from any state.
    pub fn on(self, event: SyncEvent) -> Option<SyncState> {
        match (self, event) {
            (SyncState::Initialised, SyncEvent::BootstrapStarted) => Some(SyncState::QueuingUpdates),
            (SyncState::QueuingUpdates, SyncEvent::Synchronised) => Some(SyncState::Synchronised),
            (_, SyncEvent::Desynchronised) => Some(SyncState::Desynchronised),
            (SyncState::Desynchronised, SyncEvent::Reset) => Some(SyncState::Initialised),
            _ => None,
        }
    }
}

/// Something that happened to a book, driving its [`SyncState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncEvent {
    /// First update seen and a bootstrap task launched
    BootstrapStarted,
    /// Snapshot loaded and the buffer replayed on top of it
    Synchronised,
    /// Sequence broken or bootstrap failed
    Desynchronised,
    /// Stale book invalidated, ready to bootstrap again
    Reset,
}

/// Sequence number following `id`
///
/// # Errors
///
/// [`Error::SequenceOverflow`] if `id` is `u64::MAX`.
pub(crate) fn next_update_id(id: UpdateId) -> Result<UpdateId, Error> {
    id.checked_add(1).ok_or(Error::SequenceOverflow(id))
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Initialised => "initialised",
            SyncState::QueuingUpdates => "queuing_updates",
            SyncState::Synchronised => "synchronised",
            SyncState::Desynchronised => "desynchronised",
        };
        f.write_str(s)
    }
}

/// A buffered update with the first sequence number it covers
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    /// The update itself; `update.update_id` is the last id it covers
    pub update: Update,
    /// First sequence number covered
    pub first_update_id: UpdateId,
}

/// Lock-protected part of an [`UpdateCache`]
#[derive(Debug, Default)]
pub struct CacheInner {
    state: SyncState,
    updates: Vec<PendingUpdate>,
}

impl CacheInner {
    /// Current state
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Apply `event` to the state
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] if `event` is not allowed in the current
    /// state. The book is then desynchronised so the next update starts over.
    pub(crate) fn transition(&mut self, event: SyncEvent) -> Result<SyncState, Error> {
        match self.state.on(event) {
            Some(next) => {
                self.state = next;
                Ok(next)
            }
            None => {
                let from = self.state;
                self.state = SyncState::Desynchronised;
                Err(Error::InvalidTransition { from, event })
            }
        }
    }

    /// Buffered updates, oldest first
    pub fn updates(&self) -> &[PendingUpdate] {
        &self.updates
    }

    /// Append an update to the buffer
    pub(crate) fn enqueue_update(&mut self, update: Update, first_update_id: UpdateId) {
        self.updates.push(PendingUpdate {
            update,
            first_update_id,
        });
    }

    /// Highest sequence number buffered so far
    pub fn last_pending_id(&self) -> Option<UpdateId> {
        self.updates.last().map(|p| p.update.update_id)
    }

    /// Replay the buffer on top of a freshly loaded snapshot
    ///
    /// Entries the snapshot already covers are skipped. Returns how many
    /// updates were applied.
    ///
    /// # Errors
    ///
    /// - [`Error::SnapshotOutdated`] if the next entry starts past the
    ///   snapshot, leaving a hole no update will fill
    /// - [`Error::NoUpdatesApplied`] if the buffer was non-empty but every
    ///   entry predates the snapshot
    /// - [`Error::SequenceOverflow`] if the book is at the last sequence number
    /// - any error from the fan-out
    pub(crate) fn apply_pending_updates(&self, fanout: &FanOut) -> Result<usize, Error> {
        let mut applied = 0;
        for pending in &self.updates {
            let next = next_update_id(fanout.last_update_id(&pending.update.key())?)?;
            if pending.update.update_id < next {
                continue;
            }
            if next < pending.first_update_id {
                return Err(Error::SnapshotOutdated {
                    next_expected: next,
                    first_update_id: pending.first_update_id,
                });
            }
            fanout.apply(&pending.update)?;
            applied += 1;
        }

        if applied == 0 && !self.updates.is_empty() {
            return Err(Error::NoUpdatesApplied {
                pending: self.updates.len(),
            });
        }
        Ok(applied)
    }

    fn clear(&mut self) {
        self.updates.clear();
    }
}

/// Update buffer and bootstrap state for one book
///
/// # Thread Safety
///
/// The buffer and state sit behind a `parking_lot::Mutex`, which is never
/// held across an `.await`. The id of the newest buffered update is
/// published on a `watch` channel so the bootstrap task can wait for the
/// buffer to reach the snapshot without holding the lock.
#[derive(Debug)]
pub struct UpdateCache {
    key: BookKey,
    inner: Mutex<CacheInner>,
    latest: watch::Sender<UpdateId>,
}

impl UpdateCache {
    /// Create an empty cache in [`SyncState::Initialised`]
    pub fn new(key: BookKey) -> Self {
        let (latest, _) = watch::channel(0);
        Self {
            key,
            inner: Mutex::new(CacheInner::default()),
            latest,
        }
    }

    /// Book this cache belongs to
    pub fn key(&self) -> &BookKey {
        &self.key
    }

    /// Lock the buffer and state
    pub(crate) fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock()
    }

    /// Current state
    pub fn state(&self) -> SyncState {
        self.inner.lock().state
    }

    /// Number of buffered updates
    pub fn pending_len(&self) -> usize {
        self.inner.lock().updates.len()
    }

    /// Publish the id of a newly buffered update
    ///
    /// Never blocks. Only the highest id matters to a waiter, so a smaller
    /// id than the one already published is dropped.
    pub(crate) fn notify_latest(&self, update_id: UpdateId) {
        self.latest.send_if_modified(|latest| {
            if update_id > *latest {
                *latest = update_id;
                true
            } else {
                false
            }
        });
    }

    /// Drop every buffered update and reset the published id
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock();
        self.clear_locked(&mut inner);
    }

    /// [`clear`](Self::clear) for a caller already holding the lock
    pub(crate) fn clear_locked(&self, inner: &mut CacheInner) {
        inner.clear();
        self.latest.send_replace(0);
    }

    /// Wait until an update with id `>= next` has been buffered
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] if `cancel` fires first.
    pub async fn wait_for_update(
        &self,
        next: UpdateId,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let mut rx = self.latest.subscribe();
        if self.inner.lock().last_pending_id().is_some_and(|id| id >= next) {
            return Ok(());
        }

        tokio::select! {
            res = rx.wait_for(|id| *id >= next) => res.map(|_| ()).map_err(|_| Error::Cancelled),
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Bring the book in sync from a snapshot and the buffered updates
    ///
    /// Waits `start_delay`, awaits `snapshot`, then waits up to `deadline`
    /// for the buffer to reach the update following the snapshot. Under the
    /// lock, the snapshot is loaded through `fanout`, the buffer replayed and
    /// cleared, and the state set to [`SyncState::Synchronised`]. On any
    /// failure the buffer is cleared and the state set to
    /// [`SyncState::Desynchronised`] so the next update starts over.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`], [`Error::Timeout`] when the deadline passes, or
    /// whatever the snapshot future, the fan-out or the replay returned.
    pub async fn sync_orderbook<F>(
        &self,
        cancel: &CancellationToken,
        fanout: &FanOut,
        snapshot: F,
        start_delay: Duration,
        deadline: Duration,
    ) -> Result<(), Error>
    where
        F: Future<Output = Result<Snapshot, Error>>,
    {
        let prepared = self
            .await_snapshot(cancel, snapshot, start_delay, deadline)
            .await;

        let mut inner = self.inner.lock();
        let result = prepared.and_then(|snapshot| {
            fanout.load_snapshot(&snapshot)?;
            let applied = inner.apply_pending_updates(fanout)?;
            debug!(
                book = %self.key,
                snapshot_id = snapshot.last_update_id,
                applied,
                "replayed buffered updates"
            );
            Ok(())
        });

        let buffered = inner.updates.len();
        self.clear_locked(&mut inner);
        match result.and_then(|()| inner.transition(SyncEvent::Synchronised)) {
            Ok(_) => {
                info!(book = %self.key, buffered, "order book synchronised");
                Ok(())
            }
            Err(e) => {
                inner.transition(SyncEvent::Desynchronised)?;
                warn!(book = %self.key, buffered, error = %e, "order book sync failed");
                Err(e)
            }
        }
    }

    async fn await_snapshot<F>(
        &self,
        cancel: &CancellationToken,
        snapshot: F,
        start_delay: Duration,
        deadline: Duration,
    ) -> Result<Snapshot, Error>
    where
        F: Future<Output = Result<Snapshot, Error>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(start_delay) => {}
        }

        let snapshot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            fetched = snapshot => fetched?,
        };

        let next = next_update_id(snapshot.last_update_id)?;
        debug!(book = %self.key, next, "waiting for buffer to reach snapshot");
        tokio::time::timeout(deadline, self.wait_for_update(next, cancel))
            .await
            .map_err(|_| Error::Timeout(deadline))??;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::{BookStore, EnabledBooks, MemoryBookStore};
    use crate::types::{Asset, Level, Pair};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn btc() -> Pair {
        Pair::new("BTC", "USDT")
    }

    fn key() -> BookKey {
        BookKey::new(&btc(), Asset::Spot)
    }

    fn update(id: UpdateId, price: u32) -> Update {
        Update::new(btc(), Asset::Spot, id)
            .with_bids(vec![Level::new(price.into(), dec!(1))])
    }

    fn setup() -> (Arc<MemoryBookStore>, FanOut) {
        let store = Arc::new(MemoryBookStore::new());
        let mut enabled = EnabledBooks::new();
        enabled.enable_asset(Asset::Spot);
        let fanout = FanOut::new(store.clone(), enabled);
        (store, fanout)
    }

    fn queue(cache: &UpdateCache, first: UpdateId, upd: Update) {
        let id = upd.update_id;
        let mut inner = cache.lock();
        if inner.state() == SyncState::Initialised {
            inner.transition(SyncEvent::BootstrapStarted).unwrap();
        }
        inner.enqueue_update(upd, first);
        drop(inner);
        cache.notify_latest(id);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SyncState::QueuingUpdates.to_string(), "queuing_updates");
        assert!(SyncState::Desynchronised.needs_resync());
        assert!(!SyncState::Synchronised.needs_resync());
    }

    #[test]
    fn test_apply_pending_skips_stale() {
        let (store, fanout) = setup();
        store.load_snapshot(&Snapshot::new(btc(), Asset::Spot, 10)).unwrap();

        let cache = UpdateCache::new(key());
        queue(&cache, 1, update(9, 1));
        queue(&cache, 10, update(12, 2));
        queue(&cache, 13, update(13, 3));

        let applied = cache.lock().apply_pending_updates(&fanout).unwrap();
        assert_eq!(applied, 2);
        assert_eq!(store.last_update_id(&key()).unwrap(), 13);
    }

    #[test]
    fn test_apply_pending_snapshot_outdated() {
        let (store, fanout) = setup();
        store.load_snapshot(&Snapshot::new(btc(), Asset::Spot, 10)).unwrap();

        let cache = UpdateCache::new(key());
        queue(&cache, 15, update(16, 1));

        let err = cache.lock().apply_pending_updates(&fanout).unwrap_err();
        assert!(matches!(
            err,
            Error::SnapshotOutdated { next_expected: 11, first_update_id: 15 }
        ));
    }

    #[test]
    fn test_apply_pending_all_stale() {
        let (store, fanout) = setup();
        store.load_snapshot(&Snapshot::new(btc(), Asset::Spot, 10)).unwrap();

        let cache = UpdateCache::new(key());
        assert_eq!(cache.lock().apply_pending_updates(&fanout).unwrap(), 0);

        queue(&cache, 5, update(7, 1));
        assert!(matches!(
            cache.lock().apply_pending_updates(&fanout),
            Err(Error::NoUpdatesApplied { pending: 1 })
        ));
    }

    #[test]
    fn test_clear_resets_latest() {
        let cache = UpdateCache::new(key());
        queue(&cache, 1, update(5, 1));
        assert_eq!(cache.pending_len(), 1);
        assert_eq!(*cache.latest.borrow(), 5);

        cache.notify_latest(3);
        assert_eq!(*cache.latest.borrow(), 5);

        cache.clear();
        assert_eq!(cache.pending_len(), 0);
        assert_eq!(*cache.latest.borrow(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_update_already_buffered() {
        let cache = UpdateCache::new(key());
        queue(&cache, 1, update(5, 1));
        cache
            .wait_for_update(5, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_update_cancelled() {
        let cache = UpdateCache::new(key());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            cache.wait_for_update(5, &cancel).await,
            Err(Error::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_sync_orderbook() {
        let (store, fanout) = setup();
        let cache = UpdateCache::new(key());
        queue(&cache, 1, update(100, 1));
        queue(&cache, 101, update(101, 2));
        queue(&cache, 102, update(103, 3));

        let snapshot = Snapshot::new(btc(), Asset::Spot, 100)
            .with_asks(vec![Level::new(dec!(50), dec!(1))]);
        cache
            .sync_orderbook(
                &CancellationToken::new(),
                &fanout,
                async { Ok(snapshot) },
                Duration::ZERO,
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(cache.state(), SyncState::Synchronised);
        assert_eq!(cache.pending_len(), 0);
        assert_eq!(store.last_update_id(&key()).unwrap(), 103);
        assert_eq!(store.best_bid(&key()), Some((dec!(3), dec!(1))));
    }

    #[tokio::test]
    async fn test_sync_orderbook_waits_for_buffer() {
        let (store, fanout) = setup();
        let cache = Arc::new(UpdateCache::new(key()));
        queue(&cache, 1, update(10, 1));

        let feeder = {
            let cache = cache.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                queue(&cache, 11, update(11, 2));
            })
        };

        cache
            .sync_orderbook(
                &CancellationToken::new(),
                &fanout,
                async { Ok(Snapshot::new(btc(), Asset::Spot, 10)) },
                Duration::ZERO,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        feeder.await.unwrap();

        assert_eq!(store.last_update_id(&key()).unwrap(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_orderbook_deadline() {
        let (_, fanout) = setup();
        let cache = UpdateCache::new(key());
        queue(&cache, 1, update(5, 1));

        let result = cache
            .sync_orderbook(
                &CancellationToken::new(),
                &fanout,
                async { Ok(Snapshot::new(btc(), Asset::Spot, 10)) },
                Duration::ZERO,
                Duration::from_secs(120),
            )
            .await;

        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(cache.state(), SyncState::Desynchronised);
        assert_eq!(cache.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_sync_orderbook_fetch_error() {
        let (store, fanout) = setup();
        let cache = UpdateCache::new(key());
        queue(&cache, 1, update(5, 1));

        let result = cache
            .sync_orderbook(
                &CancellationToken::new(),
                &fanout,
                async { Err(Error::ConnectionClosed) },
                Duration::ZERO,
                Duration::from_secs(1),
            )
            .await;

        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert_eq!(cache.state(), SyncState::Desynchronised);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sync_orderbook_cancelled_during_delay() {
        let (_, fanout) = setup();
        let cache = UpdateCache::new(key());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = cache
            .sync_orderbook(
                &cancel,
                &fanout,
                async { Ok(Snapshot::new(btc(), Asset::Spot, 10)) },
                Duration::from_secs(60),
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(cache.state(), SyncState::Desynchronised);
    }

    #[test]
    fn test_transitions() {
        use SyncEvent::*;
        assert_eq!(SyncState::Initialised.on(BootstrapStarted), Some(SyncState::QueuingUpdates));
        assert_eq!(SyncState::QueuingUpdates.on(Synchronised), Some(SyncState::Synchronised));
        assert_eq!(SyncState::Synchronised.on(Desynchronised), Some(SyncState::Desynchronised));
        assert_eq!(SyncState::Initialised.on(Desynchronised), Some(SyncState::Desynchronised));
        assert_eq!(SyncState::Desynchronised.on(Reset), Some(SyncState::Initialised));

        assert_eq!(SyncState::Synchronised.on(BootstrapStarted), None);
        assert_eq!(SyncState::Initialised.on(Synchronised), None);
        assert_eq!(SyncState::QueuingUpdates.on(Reset), None);
    }

    #[test]
    fn test_invalid_transition_desynchronises() {
        let cache = UpdateCache::new(key());
        let mut inner = cache.lock();
        inner.transition(SyncEvent::BootstrapStarted).unwrap();

        let err = inner.transition(SyncEvent::BootstrapStarted).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: SyncState::QueuingUpdates,
                event: SyncEvent::BootstrapStarted
            }
        ));
        assert_eq!(inner.state(), SyncState::Desynchronised);
    }

    #[test]
    fn test_next_update_id() {
        assert_eq!(next_update_id(41).unwrap(), 42);
        assert!(matches!(
            next_update_id(UpdateId::MAX),
            Err(Error::SequenceOverflow(UpdateId::MAX))
        ));
    }

    #[test]
    fn test_apply_pending_book_at_last_id() {
        let (store, fanout) = setup();
        store
            .load_snapshot(&Snapshot::new(btc(), Asset::Spot, UpdateId::MAX))
            .unwrap();

        let cache = UpdateCache::new(key());
        queue(&cache, 5, update(7, 1));
        assert!(matches!(
            cache.lock().apply_pending_updates(&fanout),
            Err(Error::SequenceOverflow(UpdateId::MAX))
        ));
    }

    #[tokio::test]
    async fn test_sync_orderbook_snapshot_at_last_id() {
        let (_, fanout) = setup();
        let cache = UpdateCache::new(key());
        queue(&cache, 1, update(5, 1));

        let result = cache
            .sync_orderbook(
                &CancellationToken::new(),
                &fanout,
                async { Ok(Snapshot::new(btc(), Asset::Spot, UpdateId::MAX)) },
                Duration::ZERO,
                Duration::from_secs(1),
            )
            .await;

        assert!(matches!(result, Err(Error::SequenceOverflow(_))));
        assert_eq!(cache.state(), SyncState::Desynchronised);
        assert_eq!(cache.pending_len(), 0);
    }
}

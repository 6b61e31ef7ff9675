//! REST snapshot fetching for the bootstrap task.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::Error;
use crate::types::{Asset, Pair, Snapshot};

/// Source of full order book snapshots
///
/// [`RestClient`](crate::client::RestClient) implements this over HTTP; tests
/// substitute canned snapshots.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// Fetch the top `depth` levels of `pair` in `asset`, with the sequence
    /// number the snapshot was taken at
    async fn fetch_orderbook(&self, pair: &Pair, asset: Asset, depth: usize)
        -> Result<Snapshot, Error>;
}

/// Fetch a snapshot, backing off between retryable failures
///
/// # Errors
///
/// The last fetch error once `retry` is exhausted or the error is not
/// retryable, or [`Error::Cancelled`] if `cancel` fires while backing off.
pub async fn fetch_with_retry(
    fetcher: &dyn SnapshotFetcher,
    pair: &Pair,
    asset: Asset,
    depth: usize,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Snapshot, Error> {
    let mut attempts = 0;
    loop {
        let err = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = fetcher.fetch_orderbook(pair, asset, depth) => match result {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) => e,
            },
        };

        attempts += 1;
        if !err.is_retryable() || !retry.allows(attempts) {
            return Err(err);
        }

        let delay = retry.jittered_delay(attempts - 1);
        warn!(%pair, %asset, attempts, ?delay, error = %err, "snapshot fetch failed, retrying");
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

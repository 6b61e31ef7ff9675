//! WebSocket diff-depth stream and the read loop feeding [`SyncManager`].
//!
//! - [`DepthStream`] - connection to the exchange's order book channels
//! - [`DiffDepthParser`] - turns text frames into `(first_update_id, Update)`
//! - [`dispatch`] - reads frames until the stream ends, handing each update
//!   to the manager
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use orderbook_sync::Config;
//! use orderbook_sync::client::DepthStream;
//! use orderbook_sync::types::{Asset, Pair};
//!
//! # async fn example() -> orderbook_sync::Result<()> {
//! let mut ws = DepthStream::connect(&Config::new()).await?;
//! ws.subscribe_order_book(Asset::Spot, &[Pair::new("BTC", "USDT")], Duration::from_millis(100))
//!     .await?;
//!
//! while let Some(frame) = ws.next().await {
//!     println!("{}", frame?);
//! }
//! # Ok(())
//! # }
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::stream::{self, SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::Error;
use crate::orderbook::{DepthLimits, SyncManager};
use crate::types::messages::{DepthUpdateMsg, WsEvent, WsMessage, WsRequest};
use crate::types::{Asset, Level, Pair, Update, UpdateId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Spot diff-depth channel; also feeds margin and cross-margin books
pub const SPOT_CHANNEL: &str = "spot.order_book_update";

/// Futures and delivery diff-depth channel
pub const FUTURES_CHANNEL: &str = "futures.order_book_update";

/// Diff-depth channel carrying updates for `asset`
///
/// # Errors
///
/// [`Error::UnsupportedAsset`] for options.
pub fn channel_for(asset: Asset) -> Result<&'static str, Error> {
    match asset {
        Asset::Spot | Asset::Margin | Asset::CrossMargin => Ok(SPOT_CHANNEL),
        Asset::UsdtMarginedFutures | Asset::CoinMarginedFutures | Asset::DeliveryFutures => {
            Ok(FUTURES_CHANNEL)
        }
        Asset::Options => Err(Error::UnsupportedAsset(asset)),
    }
}

/// An order book subscription, replayed after reconnecting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthSubscription {
    /// Asset class
    pub asset: Asset,
    /// Subscribed pairs or contracts
    pub pairs: Vec<Pair>,
    /// Channel update interval
    pub interval: Duration,
}

/// WebSocket connection to the diff-depth channels
///
/// # Thread Safety
///
/// This client is NOT thread-safe. Run it in a single reader task and share
/// the [`SyncManager`] instead.
#[derive(Debug)]
pub struct DepthStream {
    url: String,
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    message_id: u64,
    subscriptions: Vec<DepthSubscription>,
}

impl DepthStream {
    /// Connect to the WebSocket endpoint from `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or handshake fails.
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let url = config.websocket_url().to_string();
        let (write, read) = open(&url).await?;
        info!(%url, "websocket connected");

        Ok(Self {
            url,
            write,
            read,
            message_id: 1,
            subscriptions: Vec::new(),
        })
    }

    /// Subscribe to diff-depth updates for `pairs`
    ///
    /// One request is sent per pair. Futures requests also carry the book
    /// depth the interval implies.
    ///
    /// # Returns
    ///
    /// The message ID of the last subscription request
    pub async fn subscribe_order_book(
        &mut self,
        asset: Asset,
        pairs: &[Pair],
        interval: Duration,
    ) -> Result<u64, Error> {
        let subscription = DepthSubscription {
            asset,
            pairs: pairs.to_vec(),
            interval,
        };
        let msg_id = self.send_subscription(&subscription).await?;
        self.subscriptions.push(subscription);
        Ok(msg_id)
    }

    /// Subscriptions made on this stream
    pub fn subscriptions(&self) -> &[DepthSubscription] {
        &self.subscriptions
    }

    /// Receive the next text frame
    ///
    /// Pings are answered automatically.
    ///
    /// # Returns
    ///
    /// The next frame, or `None` if the connection is closed.
    pub async fn next(&mut self) -> Option<Result<String, Error>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Ping(data)) => {
                    // Respond to pings automatically
                    if let Err(e) = self.write.send(Message::Pong(data)).await {
                        return Some(Err(e.into()));
                    }
                }
                Ok(Message::Close(_)) => {
                    return Some(Err(Error::ConnectionClosed));
                }
                Ok(_) => {
                    // Ignore other message types (Binary, Pong, Frame)
                    continue;
                }
                Err(e) => {
                    return Some(Err(e.into()));
                }
            }
        }
    }

    /// Text frames as a [`Stream`], for [`dispatch`]
    pub fn frames(&mut self) -> impl Stream<Item = Result<String, Error>> + '_ {
        stream::unfold(self, |ws| async move {
            let frame = ws.next().await?;
            Some((frame, ws))
        })
    }

    /// Open a fresh connection and replay every subscription
    ///
    /// Books fed by this stream will see a sequence gap and bootstrap again,
    /// so nothing else needs resetting.
    pub async fn reconnect(&mut self) -> Result<(), Error> {
        let (write, read) = open(&self.url).await?;
        self.write = write;
        self.read = read;

        let subscriptions = self.subscriptions.clone();
        for subscription in &subscriptions {
            self.send_subscription(subscription).await?;
        }
        info!(url = %self.url, subscriptions = subscriptions.len(), "websocket reconnected");
        Ok(())
    }

    /// Close the WebSocket connection
    pub async fn close(&mut self) -> Result<(), Error> {
        self.write.close().await?;
        Ok(())
    }

    async fn send_subscription(&mut self, subscription: &DepthSubscription) -> Result<u64, Error> {
        let channel = channel_for(subscription.asset)?;
        let interval = format!("{}ms", subscription.interval.as_millis());
        let level = if subscription.asset.is_futures() {
            let limits = DepthLimits::resolve([(&subscription.asset, &subscription.interval)])?;
            Some(limits.limit(subscription.asset)?.to_string())
        } else {
            None
        };

        let mut msg_id = self.message_id;
        for pair in &subscription.pairs {
            let mut payload = vec![pair.to_string(), interval.clone()];
            payload.extend(level.clone());
            msg_id = self
                .send_request(WsRequest {
                    time: unix_time(),
                    id: self.message_id,
                    channel: channel.to_string(),
                    event: WsEvent::Subscribe,
                    payload,
                })
                .await?;
        }
        debug!(channel, pairs = subscription.pairs.len(), %interval, "subscribed");
        Ok(msg_id)
    }

    /// Send a request to the WebSocket server
    async fn send_request(&mut self, req: WsRequest) -> Result<u64, Error> {
        let msg_id = self.message_id;
        let json = serde_json::to_string(&req)?;
        self.write.send(Message::Text(json)).await?;
        self.message_id += 1;
        Ok(msg_id)
    }
}

async fn open(url: &str) -> Result<(SplitSink<WsStream, Message>, SplitStream<WsStream>), Error> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
    Ok(ws_stream.split())
}

fn unix_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Parser for one diff-depth channel
#[derive(Debug, Clone)]
pub struct DiffDepthParser {
    channel: String,
    asset: Asset,
}

impl DiffDepthParser {
    /// Parse frames of `channel`, attributing updates to `asset`
    pub fn new(channel: impl Into<String>, asset: Asset) -> Self {
        Self {
            channel: channel.into(),
            asset,
        }
    }

    /// Parser for the channel carrying `asset`
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedAsset`] for options.
    pub fn for_asset(asset: Asset) -> Result<Self, Error> {
        Ok(Self::new(channel_for(asset)?, asset))
    }

    /// Channel this parser accepts
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Parse one text frame
    ///
    /// # Returns
    ///
    /// - `Ok(Some((first_update_id, update)))` for a diff on this channel
    /// - `Ok(None)` for other channels and request acknowledgements
    ///
    /// # Errors
    ///
    /// Malformed JSON, an unparseable symbol, or a server-side error reply
    /// on this channel.
    pub fn parse(&self, text: &str) -> Result<Option<(UpdateId, Update)>, Error> {
        let msg: WsMessage = serde_json::from_str(text)?;
        if msg.channel != self.channel {
            return Ok(None);
        }
        if let Some(err) = msg.error {
            return Err(Error::Config(format!(
                "{} {} rejected: {} (code {})",
                msg.channel, msg.event, err.message, err.code
            )));
        }
        if !msg.is_update() {
            return Ok(None);
        }
        let Some(result) = msg.result else {
            return Ok(None);
        };

        let depth: DepthUpdateMsg = serde_json::from_value(result)?;
        let pair: Pair = depth.symbol.parse()?;
        // An empty diff still advances the sequence
        let update = Update::new(pair, self.asset, depth.last_update_id)
            .with_update_time(depth.time_ms)
            .with_bids(depth.bids.into_iter().map(Level::from).collect())
            .with_asks(depth.asks.into_iter().map(Level::from).collect())
            .allow_empty();
        Ok(Some((depth.first_update_id, update)))
    }
}

/// Counters reported by [`dispatch`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Frames read from the stream
    pub frames: u64,
    /// Updates accepted by the manager
    pub updates: u64,
    /// Frames that failed to parse
    pub parse_errors: u64,
    /// Updates the manager rejected
    pub sync_errors: u64,
}

/// Feed every diff on `frames` to `manager` until the stream ends
///
/// Parse failures and per-book errors are logged and skipped: a gap on one
/// book heals itself on a later update and must not stop the others. Returns
/// when the stream ends or reports [`Error::ConnectionClosed`].
pub async fn dispatch<S>(frames: S, parser: &DiffDepthParser, manager: &SyncManager) -> DispatchStats
where
    S: Stream<Item = Result<String, Error>>,
{
    tokio::pin!(frames);
    let mut stats = DispatchStats::default();

    while let Some(frame) = frames.next().await {
        let text = match frame {
            Ok(text) => text,
            Err(Error::ConnectionClosed) => {
                info!("websocket closed by server");
                break;
            }
            Err(e) => {
                warn!(error = %e, "websocket read failed");
                continue;
            }
        };
        stats.frames += 1;

        let (first_update_id, update) = match parser.parse(&text) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => {
                trace!(frame = %text, "ignoring frame");
                continue;
            }
            Err(e) => {
                stats.parse_errors += 1;
                warn!(channel = parser.channel(), error = %e, "failed to parse frame");
                continue;
            }
        };

        let key = update.key();
        match manager.process_orderbook_update(first_update_id, update) {
            Ok(()) => stats.updates += 1,
            Err(e) => {
                stats.sync_errors += 1;
                warn!(book = %key, error = %e, "order book update rejected");
            }
        }
    }

    debug!(?stats, "dispatch loop finished");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const FRAME: &str = r#"{"time":1606294781,"time_ms":1606294781236,"channel":"spot.order_book_update",
        "event":"update","result":{"t":1606294781123,"e":"depthUpdate","E":1606294781,"s":"BTC_USDT",
        "U":48776301,"u":48776306,"b":[["19137.74","0.0001"],["19088.37","0"]],"a":[["19137.75","0.6135"]]}}"#;

    #[test]
    fn test_channel_for() {
        assert_eq!(channel_for(Asset::Margin).unwrap(), SPOT_CHANNEL);
        assert_eq!(channel_for(Asset::DeliveryFutures).unwrap(), FUTURES_CHANNEL);
        assert!(channel_for(Asset::Options).is_err());
    }

    #[test]
    fn test_parse_update() {
        let parser = DiffDepthParser::for_asset(Asset::Spot).unwrap();
        let (first, update) = parser.parse(FRAME).unwrap().unwrap();

        assert_eq!(first, 48776301);
        assert_eq!(update.update_id, 48776306);
        assert_eq!(update.update_time, 1606294781123);
        assert_eq!(update.pair, Pair::new("BTC", "USDT"));
        assert_eq!(update.asset, Asset::Spot);
        assert_eq!(update.bids[1], Level::new(dec!(19088.37), dec!(0)));
        assert_eq!(update.asks.len(), 1);
    }

    #[test]
    fn test_parse_futures_object_levels() {
        let frame = r#"{"time":1615366381,"channel":"futures.order_book_update","event":"update",
            "result":{"t":1615366381417,"s":"BTC_USD","U":2517661101,"u":2517661113,
            "b":[{"p":"54672.1","s":0}],"a":[{"p":"54743.6","s":95}]}}"#;
        let parser = DiffDepthParser::for_asset(Asset::CoinMarginedFutures).unwrap();
        let (first, update) = parser.parse(frame).unwrap().unwrap();

        assert_eq!(first, 2517661101);
        assert_eq!(update.asset, Asset::CoinMarginedFutures);
        assert_eq!(update.asks[0], Level::new(dec!(54743.6), dec!(95)));
    }

    #[test]
    fn test_parse_ignores_other_frames() {
        let parser = DiffDepthParser::for_asset(Asset::Spot).unwrap();

        let ack = r#"{"time":1,"id":1,"channel":"spot.order_book_update","event":"subscribe","result":{"status":"success"}}"#;
        assert!(parser.parse(ack).unwrap().is_none());

        let other = r#"{"time":1,"channel":"spot.trades","event":"update","result":{}}"#;
        assert!(parser.parse(other).unwrap().is_none());
    }

    #[test]
    fn test_parse_errors() {
        let parser = DiffDepthParser::for_asset(Asset::Spot).unwrap();
        assert!(matches!(parser.parse("not json"), Err(Error::Json(_))));

        let rejected = r#"{"time":1,"id":1,"channel":"spot.order_book_update","event":"subscribe",
            "error":{"code":2,"message":"unknown currency pair"}}"#;
        assert!(matches!(parser.parse(rejected), Err(Error::Config(_))));

        let bad_symbol = FRAME.replace("BTC_USDT", "BTCUSDT");
        assert!(matches!(parser.parse(&bad_symbol), Err(Error::InvalidPair(_))));
    }
}

//! Integration tests for the REST snapshot client.
//!
//! Most tests run against a one-shot HTTP server on localhost. The live tests
//! hit the public production API and only run when asked to.
//!
//! # Running
//!
//! ```bash
//! ORDERBOOK_SYNC_LIVE=1 cargo test --test integration_rest
//! ```

use std::time::Duration;

use orderbook_sync::client::RestClient;
use orderbook_sync::config::RetryPolicy;
use orderbook_sync::error::Error;
use orderbook_sync::orderbook::{fetch_with_retry, SnapshotFetcher};
use orderbook_sync::types::{Asset, Level, Pair};
use orderbook_sync::Config;
use rust_decimal_macros::dec;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Serve canned responses, one per connection, and hand back the request lines
async fn serve(responses: Vec<String>) -> (Config, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let head = String::from_utf8_lossy(&buf);
            requests.push(head.lines().next().unwrap_or_default().to_string());
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
        requests
    });

    let config = Config::new()
        .with_rest_base_url(format!("http://{addr}/api/v4"))
        .with_timeout(Duration::from_secs(5));
    (config, handle)
}

fn response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut out = format!("HTTP/1.1 {status}\r\nConnection: close\r\n");
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("Content-Type: application/json\r\n");
    out.push_str(&format!("Content-Length: {}\r\n\r\n{body}", body.len()));
    out
}

const SPOT_BOOK: &str = r#"{"id":1340,"current":1623898993123,"update":1623898993121,
"asks":[["1.52","1.151"],["1.53","1.218"]],"bids":[["1.17","201.863"],["1.16","153.2"]]}"#;

#[tokio::test]
async fn test_spot_snapshot_request() {
    let (config, server) = serve(vec![response("200 OK", &[], SPOT_BOOK)]).await;
    let rest = RestClient::new(&config).unwrap();

    let snapshot = rest
        .fetch_orderbook(&Pair::new("BTC", "USDT"), Asset::Spot, 100)
        .await
        .unwrap();

    assert_eq!(snapshot.last_update_id, 1340);
    assert_eq!(snapshot.asset, Asset::Spot);
    assert_eq!(snapshot.bids.len(), 2);
    assert_eq!(snapshot.asks[0], Level::new(dec!(1.52), dec!(1.151)));

    let requests = server.await.unwrap();
    assert_eq!(
        requests,
        vec!["GET /api/v4/spot/order_book?currency_pair=BTC_USDT&limit=100&with_id=true HTTP/1.1"]
    );
}

#[tokio::test]
async fn test_futures_snapshot_request() {
    let body = r#"{"id":77,"current":1623898993.123,"update":1623898993.121,
        "asks":[{"p":"1.52","s":100}],"bids":[{"p":"1.17","s":150}]}"#;
    let (config, server) = serve(vec![response("200 OK", &[], body)]).await;
    let rest = RestClient::new(&config).unwrap();

    let snapshot = rest
        .fetch_orderbook(&Pair::new("BTC", "USDT"), Asset::UsdtMarginedFutures, 20)
        .await
        .unwrap();

    assert_eq!(snapshot.last_update_id, 77);
    assert_eq!(snapshot.bids[0], Level::new(dec!(1.17), dec!(150)));

    let requests = server.await.unwrap();
    assert!(requests[0].starts_with("GET /api/v4/futures/usdt/order_book?contract=BTC_USDT&limit=20"));
}

#[tokio::test]
async fn test_rate_limited() {
    let (config, server) = serve(vec![response(
        "429 Too Many Requests",
        &[("Retry-After", "2")],
        "{}",
    )])
    .await;
    let rest = RestClient::new(&config).unwrap();

    let err = rest
        .fetch_orderbook(&Pair::new("BTC", "USDT"), Asset::Spot, 100)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RateLimited { retry_after_ms: Some(2000) }));
    assert!(err.is_retryable());
    server.await.unwrap();
}

#[tokio::test]
async fn test_api_error_label() {
    let body = r#"{"label":"INVALID_CURRENCY_PAIR","message":"Invalid currency pair FOO_BAR"}"#;
    let (config, server) = serve(vec![response("400 Bad Request", &[], body)]).await;
    let rest = RestClient::new(&config).unwrap();

    let err = rest
        .fetch_orderbook(&Pair::new("FOO", "BAR"), Asset::Spot, 100)
        .await
        .unwrap_err();

    match &err {
        Error::Api(api) => {
            assert_eq!(api.status, 400);
            assert_eq!(api.label.as_deref(), Some("INVALID_CURRENCY_PAIR"));
            assert_eq!(api.message, "Invalid currency pair FOO_BAR");
        }
        other => panic!("expected API error, got {other:?}"),
    }
    assert!(!err.is_retryable());
    server.await.unwrap();
}

#[tokio::test]
async fn test_retry_recovers_from_server_error() {
    let (config, server) = serve(vec![
        response("503 Service Unavailable", &[], r#"{"message":"busy"}"#),
        response("200 OK", &[], SPOT_BOOK),
    ])
    .await;
    let rest = RestClient::new(&config).unwrap();
    let retry = RetryPolicy::new().max_retries(3).initial_delay_ms(1).jitter(0.0);

    let snapshot = fetch_with_retry(
        &rest,
        &Pair::new("BTC", "USDT"),
        Asset::Spot,
        100,
        &retry,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(snapshot.last_update_id, 1340);
    assert_eq!(server.await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_options_unsupported() {
    let rest = RestClient::new(&Config::new()).unwrap();
    let err = rest
        .fetch_orderbook(&Pair::new("BTC", "USDT"), Asset::Options, 100)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedAsset(Asset::Options)));
}

/// Client for the public production API, if live tests were requested
fn live_client() -> Option<RestClient> {
    std::env::var("ORDERBOOK_SYNC_LIVE").ok()?;
    RestClient::new(&Config::new()).ok()
}

/// Skip test if live tests were not requested
macro_rules! require_live {
    () => {
        match live_client() {
            Some(c) => c,
            None => {
                eprintln!("Skipping test: ORDERBOOK_SYNC_LIVE not set");
                return;
            }
        }
    };
}

#[tokio::test]
async fn test_live_spot_snapshot() {
    let rest = require_live!();

    let snapshot = rest
        .fetch_orderbook(&Pair::new("BTC", "USDT"), Asset::Spot, 10)
        .await;
    assert!(snapshot.is_ok(), "Failed to fetch snapshot: {:?}", snapshot);

    let snapshot = snapshot.unwrap();
    println!("BTC_USDT at {}: {} bids", snapshot.last_update_id, snapshot.bids.len());
    assert!(snapshot.last_update_id > 0);
    assert!(!snapshot.bids.is_empty());
}

#[tokio::test]
async fn test_live_futures_snapshot() {
    let rest = require_live!();

    let snapshot = rest
        .fetch_orderbook(&Pair::new("BTC", "USDT"), Asset::UsdtMarginedFutures, 10)
        .await;
    assert!(snapshot.is_ok(), "Failed to fetch snapshot: {:?}", snapshot);
}

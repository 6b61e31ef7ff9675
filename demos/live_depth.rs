//! Live order book sync - keeps BTC_USDT and ETH_USDT in step with the exchange
//!
//! Usage:
//!   cargo run --example live_depth
//!
//! Optional:
//!   SYNC_PAIRS=BTC_USDT,SOL_USDT  # Pairs to track (default: BTC_USDT,ETH_USDT)
//!   RUST_LOG=orderbook_sync=debug # Show bootstrap and fan-out details

use std::sync::Arc;
use std::time::Duration;

use orderbook_sync::client::{dispatch, DepthStream, DiffDepthParser, RestClient};
use orderbook_sync::config::{RetryPolicy, SyncConfig};
use orderbook_sync::orderbook::MemoryBookStore;
use orderbook_sync::types::{Asset, BookKey, Pair};
use orderbook_sync::{Config, SyncManager};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("orderbook_sync=info".parse()?),
        )
        .init();

    let pairs = std::env::var("SYNC_PAIRS")
        .unwrap_or_else(|_| "BTC_USDT,ETH_USDT".to_string())
        .split(',')
        .map(str::parse)
        .collect::<Result<Vec<Pair>, _>>()?;

    println!("=== Live Order Book Sync ===\n");

    let config = Config::new();
    let interval = Duration::from_millis(100);
    let sync = SyncConfig::new()
        .with_subscription(Asset::Spot, interval)
        .with_start_delay(Duration::from_secs(1))
        .with_retry(RetryPolicy::new().max_retries(5));

    let store = Arc::new(MemoryBookStore::new());
    let rest = Arc::new(RestClient::new(&config)?);
    let manager = Arc::new(SyncManager::new(sync, store.clone(), rest)?);

    // Print top of book every few seconds
    let keys: Vec<BookKey> = pairs.iter().map(|p| BookKey::new(p, Asset::Spot)).collect();
    let printer = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(5));
            loop {
                tick.tick().await;
                for key in &keys {
                    let state = manager.state(key).map(|s| s.to_string());
                    match (store.best_bid(key), store.best_ask(key)) {
                        (Some((bid, bid_amt)), Some((ask, ask_amt))) => println!(
                            "{key}: {bid_amt} @ {bid} | {ask_amt} @ {ask} | spread {} | {}",
                            ask - bid,
                            state.unwrap_or_default()
                        ),
                        _ => println!("{key}: no book yet ({})", state.unwrap_or_default()),
                    }
                }
            }
        })
    };

    let parser = DiffDepthParser::for_asset(Asset::Spot)?;
    let reconnect = RetryPolicy::new().max_retries(0).initial_delay_ms(100);
    let mut ws = DepthStream::connect(&config).await?;
    ws.subscribe_order_book(Asset::Spot, &pairs, interval).await?;

    println!("(Press Ctrl+C to stop)\n");

    let mut attempt = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            stats = dispatch(ws.frames(), &parser, &manager) => {
                println!("Stream ended after {} frames, reconnecting...", stats.frames);
            }
        }

        // Books see a gap after reconnecting and bootstrap again
        loop {
            tokio::time::sleep(reconnect.jittered_delay(attempt)).await;
            match ws.reconnect().await {
                Ok(()) => {
                    attempt = 0;
                    break;
                }
                Err(e) => {
                    eprintln!("Reconnect failed: {e}");
                    attempt += 1;
                }
            }
        }
    }

    println!("\nShutting down...");
    printer.abort();
    manager.shutdown().await;
    ws.close().await?;
    Ok(())
}

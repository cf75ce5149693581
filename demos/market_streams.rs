//! Subscribes to a handful of Binance market streams and logs what arrives.
//!
//! This example shows how to:
//! 1. Register handlers for trades, klines and the all-market ticker array
//! 2. Subscribe with single, list and kline shapes
//! 3. Watch connection state changes and list the active subscriptions
//! 4. Unsubscribe and close
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,binance_stream=debug cargo run --example market_streams --features tracing
//! ```
//!
//! Optionally log to a file:
//! ```sh
//! LOG_FILE=market_streams.log RUST_LOG=info cargo run --example market_streams --features tracing
//! ```

use std::fs::File;
use std::sync::Arc;
use std::time::Duration;

use binance_stream::error::{BoxError, Error};
use binance_stream::stream::{Client, Handler, Kline, Ticker, Trade, handler_fn};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Ok(path) = std::env::var("LOG_FILE") {
        let file = File::create(path)?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let client = Client::default();

    client.handler(Handler::trade(handler_fn(|trade: Trade| async move {
        info!(
            stream = "trade",
            symbol = %trade.symbol,
            price = %trade.price,
            quantity = %trade.quantity,
            maker = trade.is_maker
        );
        Ok::<(), BoxError>(())
    })))?;

    client.handler(Handler::kline(handler_fn(|kline: Kline| async move {
        info!(
            stream = "kline",
            symbol = %kline.symbol,
            interval = %kline.interval,
            open = %kline.open,
            close = %kline.close,
            closed = kline.is_closed
        );
        Ok::<(), BoxError>(())
    })))?;

    client.handler(Handler::all_market_tickers(handler_fn(
        |tickers: Vec<Ticker>| async move {
            let busiest = tickers.iter().max_by_key(|t| t.total_trades);
            info!(
                stream = "allMarketTickers",
                count = tickers.len(),
                busiest = ?busiest.map(|t| &t.symbol)
            );
            Ok::<(), BoxError>(())
        },
    )))?;

    client.handler(Handler::exception(handler_fn(|e: Arc<Error>| async move {
        warn!(error = %e, "dispatch failed");
        Ok::<(), BoxError>(())
    })))?;

    let mut state_rx = client.state_receiver();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow_and_update();
            info!(state = ?state, "connection state changed");
        }
    });

    client.connect();

    client.subscribe(("trade", ["BTCUSDT", "ETHUSDT"])).await?;
    client.subscribe(("kline", ["1m", "5m"], "BNBUSDT")).await?;
    client.subscribe(("allMarketTickers",)).await?;

    let streams = client.list_subscriptions().await?;
    info!(streams = ?streams, "active subscriptions");

    tokio::time::sleep(Duration::from_secs(20)).await;

    client.unsubscribe(("allMarketTickers",)).await?;
    info!(remembered = ?client.subscribed_streams(), "unsubscribed from all-market tickers");

    tokio::time::sleep(Duration::from_secs(10)).await;

    client.close().await?;
    info!("closed");

    Ok(())
}

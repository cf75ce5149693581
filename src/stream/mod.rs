//! Binance market data streams.
//!
//! A [`Client`] wires a [`Router`] into a [`ConnectionManager`](crate::ws::ConnectionManager):
//! replies resolve the requests that caused them, every other frame is offered
//! to the processors that have handlers.
//!
//! # Subscription shapes
//!
//! | Shape | Streams |
//! |-------|---------|
//! | `("allMarketTickers",)` | `!ticker@arr` |
//! | `("trade", "BTCUSDT")` | `btcusdt@trade` |
//! | `(["trade", "ticker"], ["BTCUSDT", "ETHUSDT"])` | 4 streams, one per pair |
//! | `("kline", ["1m", "1h"], "BNBUSDT")` | `bnbusdt@kline_1m`, `bnbusdt@kline_1h` |

#![expect(
    clippy::module_name_repetitions,
    reason = "Re-exported names intentionally match their modules for API clarity"
)]

pub mod client;
pub mod handler;
pub mod interest;
pub mod processor;
pub mod router;
pub mod shape;
pub mod types;

pub use client::{Client, DEFAULT_ENDPOINT, SubscriptionLedger};
pub use handler::{Handle, Handler, HandlerFn, handler_fn};
pub use interest::{ActiveTracker, SubTypeSet};
pub use processor::{Channel, ExceptionProcessor, Processor, StreamPayload};
pub use router::Router;
pub use shape::{Shape, ShapeArg, Shapes, SubscriptionParam};
pub use types::request::{Method, StreamRequest};
pub use types::response::{AggTrade, Kline, MiniTicker, Ticker, Trade};

pub use crate::ws::WsError;

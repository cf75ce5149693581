use bon::Builder;
use serde::Deserialize;
use serde_with::{DisplayFromStr, TimestampMilliSeconds, serde_as};

use crate::types::{DateTime, Decimal, KlineInterval, Utc};

/// Individual trade (`<symbol>@trade`).
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize, Builder)]
pub struct Trade {
    #[serde(rename = "E")]
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub event_time: DateTime<Utc>,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "t")]
    pub trade_id: u64,
    #[serde(rename = "p")]
    pub price: Decimal,
    #[serde(rename = "q")]
    pub quantity: Decimal,
    /// Present on older payload revisions only
    #[serde(rename = "b", default)]
    pub buyer_order_id: Option<u64>,
    /// Present on older payload revisions only
    #[serde(rename = "a", default)]
    pub seller_order_id: Option<u64>,
    #[serde(rename = "T")]
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub trade_time: DateTime<Utc>,
    /// Whether the buyer was the maker
    #[serde(rename = "m")]
    pub is_maker: bool,
}

/// Trades aggregated by taker order, price and time (`<symbol>@aggTrade`).
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize, Builder)]
pub struct AggTrade {
    #[serde(rename = "E")]
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub event_time: DateTime<Utc>,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "a")]
    pub agg_trade_id: u64,
    #[serde(rename = "p")]
    pub price: Decimal,
    #[serde(rename = "q")]
    pub quantity: Decimal,
    #[serde(rename = "f")]
    pub first_trade_id: u64,
    #[serde(rename = "l")]
    pub last_trade_id: u64,
    #[serde(rename = "T")]
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub trade_time: DateTime<Utc>,
    #[serde(rename = "m")]
    pub is_maker: bool,
}

/// Candlestick update (`<symbol>@kline_<interval>`).
///
/// The event time of the enclosing push is folded into the candle.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize, Builder)]
#[serde(from = "KlineEvent")]
pub struct Kline {
    pub event_time: DateTime<Utc>,
    pub symbol: String,
    pub interval: KlineInterval,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub first_trade_id: i64,
    pub last_trade_id: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    pub taker_volume: Decimal,
    pub taker_quote_volume: Decimal,
    pub total_trades: u64,
    /// Whether this candle is final
    pub is_closed: bool,
}

/// Wire form of a kline push: the candle nested under `k`.
#[serde_as]
#[derive(Deserialize)]
struct KlineEvent {
    #[serde(rename = "E")]
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    event_time: DateTime<Utc>,
    #[serde(rename = "k")]
    candle: Candle,
}

#[serde_as]
#[derive(Deserialize)]
struct Candle {
    #[serde(rename = "t")]
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    open_time: DateTime<Utc>,
    #[serde(rename = "T")]
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    close_time: DateTime<Utc>,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "i")]
    #[serde_as(as = "DisplayFromStr")]
    interval: KlineInterval,
    /// `-1` when no trade happened in the candle
    #[serde(rename = "f")]
    first_trade_id: i64,
    #[serde(rename = "L")]
    last_trade_id: i64,
    #[serde(rename = "o")]
    open: Decimal,
    #[serde(rename = "c")]
    close: Decimal,
    #[serde(rename = "h")]
    high: Decimal,
    #[serde(rename = "l")]
    low: Decimal,
    #[serde(rename = "v")]
    volume: Decimal,
    #[serde(rename = "n")]
    total_trades: u64,
    #[serde(rename = "x")]
    is_closed: bool,
    #[serde(rename = "q")]
    quote_volume: Decimal,
    #[serde(rename = "V")]
    taker_volume: Decimal,
    #[serde(rename = "Q")]
    taker_quote_volume: Decimal,
}

impl From<KlineEvent> for Kline {
    fn from(event: KlineEvent) -> Self {
        let KlineEvent { event_time, candle } = event;

        Self {
            event_time,
            symbol: candle.symbol,
            interval: candle.interval,
            open_time: candle.open_time,
            close_time: candle.close_time,
            first_trade_id: candle.first_trade_id,
            last_trade_id: candle.last_trade_id,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
            quote_volume: candle.quote_volume,
            taker_volume: candle.taker_volume,
            taker_quote_volume: candle.taker_quote_volume,
            total_trades: candle.total_trades,
            is_closed: candle.is_closed,
        }
    }
}

/// Rolling 24h statistics, reduced (`<symbol>@miniTicker`, `!miniTicker@arr`).
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize, Builder)]
pub struct MiniTicker {
    #[serde(rename = "E")]
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub event_time: DateTime<Utc>,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "o")]
    pub open: Decimal,
    #[serde(rename = "h")]
    pub high: Decimal,
    #[serde(rename = "l")]
    pub low: Decimal,
    #[serde(rename = "c")]
    pub close: Decimal,
    /// Base asset volume
    #[serde(rename = "v")]
    pub volume: Decimal,
    #[serde(rename = "q")]
    pub quote_volume: Decimal,
}

/// Rolling 24h statistics (`<symbol>@ticker`, `!ticker@arr`).
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize, Builder)]
pub struct Ticker {
    #[serde(rename = "E")]
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub event_time: DateTime<Utc>,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price_change: Decimal,
    #[serde(rename = "P")]
    pub price_change_percent: Decimal,
    #[serde(rename = "w")]
    pub weighted_average_price: Decimal,
    /// Last price before the 24h window
    #[serde(rename = "x")]
    pub first_trade_price: Decimal,
    #[serde(rename = "c")]
    pub last_price: Decimal,
    #[serde(rename = "Q")]
    pub last_quantity: Decimal,
    #[serde(rename = "b")]
    pub best_bid_price: Decimal,
    #[serde(rename = "B")]
    pub best_bid_quantity: Decimal,
    #[serde(rename = "a")]
    pub best_ask_price: Decimal,
    #[serde(rename = "A")]
    pub best_ask_quantity: Decimal,
    #[serde(rename = "o")]
    pub open: Decimal,
    #[serde(rename = "h")]
    pub high: Decimal,
    #[serde(rename = "l")]
    pub low: Decimal,
    #[serde(rename = "v")]
    pub volume: Decimal,
    #[serde(rename = "q")]
    pub quote_volume: Decimal,
    #[serde(rename = "O")]
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub stat_open_time: DateTime<Utc>,
    #[serde(rename = "C")]
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub stat_close_time: DateTime<Utc>,
    #[serde(rename = "F")]
    pub first_trade_id: i64,
    #[serde(rename = "L")]
    pub last_trade_id: i64,
    #[serde(rename = "n")]
    pub total_trades: u64,
}

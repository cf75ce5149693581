//! Stream subtypes, kline intervals and re-exported external types.

use std::fmt;
use std::str::FromStr;

use strum_macros::{Display, IntoStaticStr};

/// Date and time types for event timestamps.
pub use chrono::{DateTime, Utc};
/// Arbitrary precision decimal type for prices and quantities.
pub use rust_decimal::Decimal;

use crate::error::{Error, UnsupportedSubType};

/// Message subtype families the stream service pushes.
///
/// The string form is the name accepted in subscription shapes, e.g.
/// `("aggTrade", "BTCUSDT")`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum SubType {
    #[strum(serialize = "trade")]
    Trade,
    #[strum(serialize = "aggTrade")]
    AggTrade,
    /// Candlesticks; the only family whose shape takes an extra interval key.
    #[strum(serialize = "kline")]
    Kline,
    #[strum(serialize = "miniTicker")]
    MiniTicker,
    #[strum(serialize = "ticker")]
    Ticker,
    #[strum(serialize = "allMarketMiniTickers")]
    AllMarketMiniTickers,
    #[strum(serialize = "allMarketTickers")]
    AllMarketTickers,
}

impl SubType {
    pub const ALL: [SubType; 7] = [
        Self::Trade,
        Self::AggTrade,
        Self::Kline,
        Self::MiniTicker,
        Self::Ticker,
        Self::AllMarketMiniTickers,
        Self::AllMarketTickers,
    ];
}

impl FromStr for SubType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|subtype| <&'static str>::from(*subtype) == s)
            .ok_or_else(|| {
                UnsupportedSubType {
                    subtype: s.to_owned(),
                }
                .into()
            })
    }
}

/// Candlestick interval used as the key of a [`SubType::Kline`] subscription.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum KlineInterval {
    #[strum(serialize = "1s")]
    Second,
    #[strum(serialize = "1m")]
    Minute,
    #[strum(serialize = "3m")]
    ThreeMinutes,
    #[strum(serialize = "5m")]
    FiveMinutes,
    #[strum(serialize = "15m")]
    FifteenMinutes,
    #[strum(serialize = "30m")]
    ThirtyMinutes,
    #[strum(serialize = "1h")]
    Hour,
    #[strum(serialize = "2h")]
    TwoHours,
    #[strum(serialize = "4h")]
    FourHours,
    #[strum(serialize = "6h")]
    SixHours,
    #[strum(serialize = "8h")]
    EightHours,
    #[strum(serialize = "12h")]
    TwelveHours,
    #[strum(serialize = "1d")]
    Day,
    #[strum(serialize = "3d")]
    ThreeDays,
    #[strum(serialize = "1w")]
    Week,
    #[strum(serialize = "1M")]
    Month,
}

impl KlineInterval {
    pub const ALL: [KlineInterval; 16] = [
        Self::Second,
        Self::Minute,
        Self::ThreeMinutes,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::Hour,
        Self::TwoHours,
        Self::FourHours,
        Self::SixHours,
        Self::EightHours,
        Self::TwelveHours,
        Self::Day,
        Self::ThreeDays,
        Self::Week,
        Self::Month,
    ];
}

/// Returned when a string is not a known kline interval.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownInterval(pub String);

impl fmt::Display for UnknownInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown kline interval `{}`", self.0)
    }
}

impl std::error::Error for UnknownInterval {}

impl FromStr for KlineInterval {
    type Err = UnknownInterval;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|interval| <&'static str>::from(*interval) == s)
            .ok_or_else(|| UnknownInterval(s.to_owned()))
    }
}

use std::sync::atomic::{AtomicU16, Ordering};

use bitflags::bitflags;

use crate::types::SubType;

bitflags! {
    /// Set of message families, one bit per [`SubType`].
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SubTypeSet: u16 {
        const NONE = 0;

        const TRADE = 1;

        const AGG_TRADE = 1 << 1;

        const KLINE = 1 << 2;

        const MINI_TICKER = 1 << 3;

        const TICKER = 1 << 4;

        /// `!miniTicker@arr`
        const ALL_MARKET_MINI_TICKERS = 1 << 5;

        /// `!ticker@arr`
        const ALL_MARKET_TICKERS = 1 << 6;
    }
}

impl From<SubType> for SubTypeSet {
    fn from(subtype: SubType) -> Self {
        match subtype {
            SubType::Trade => Self::TRADE,
            SubType::AggTrade => Self::AGG_TRADE,
            SubType::Kline => Self::KLINE,
            SubType::MiniTicker => Self::MINI_TICKER,
            SubType::Ticker => Self::TICKER,
            SubType::AllMarketMiniTickers => Self::ALL_MARKET_MINI_TICKERS,
            SubType::AllMarketTickers => Self::ALL_MARKET_TICKERS,
        }
    }
}

/// Families that have at least one handler.
///
/// Bits are only ever added: a processor stays active once it has a handler.
#[derive(Debug, Default)]
pub struct ActiveTracker {
    active: AtomicU16,
}

impl ActiveTracker {
    /// Create a new tracker with nothing active.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: AtomicU16::new(0),
        }
    }

    /// Mark a family as active.
    pub fn add(&self, subtype: SubType) {
        self.active
            .fetch_or(SubTypeSet::from(subtype).bits(), Ordering::Release);
    }

    /// Get the current active set.
    #[must_use]
    pub fn get(&self) -> SubTypeSet {
        SubTypeSet::from_bits(self.active.load(Ordering::Acquire)).unwrap_or(SubTypeSet::NONE)
    }

    #[must_use]
    pub fn is_active(&self, subtype: SubType) -> bool {
        self.get().contains(subtype.into())
    }
}

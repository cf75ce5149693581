//! Application handlers and the tagged [`Handler`] used to register them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::types::response::{AggTrade, Kline, MiniTicker, Ticker, Trade};
use crate::error::{BoxError, Error};
use crate::types::SubType;

/// Receives payloads of one type.
///
/// Handlers registered for the same family run one after another, in
/// registration order. Returning an error stops the remaining handlers for that
/// payload and forwards the error to the exception handlers.
#[async_trait]
pub trait Handle<T: Send + Sync + 'static>: Send + Sync + 'static {
    async fn handle(&self, payload: &T) -> Result<(), BoxError>;
}

/// Adapter turning an async closure into a [`Handle`].
///
/// The closure receives its own copy of the payload.
#[non_exhaustive]
#[derive(Clone)]
pub struct HandlerFn<F>(pub F);

/// Wrap an async closure as a [`Handle`].
///
/// ```ignore
/// let handler = Handler::trade(handler_fn(|trade: Trade| async move {
///     println!("{} traded at {}", trade.symbol, trade.price);
///     Ok(())
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn(f)
}

#[async_trait]
impl<T, F, Fut> Handle<T> for HandlerFn<F>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    async fn handle(&self, payload: &T) -> Result<(), BoxError> {
        (self.0)(payload.clone()).await
    }
}

/// A handler tagged with the family it accepts.
///
/// Exactly one processor (or the exception processor) claims each variant.
#[non_exhaustive]
#[derive(Clone)]
pub enum Handler {
    Trade(Arc<dyn Handle<Trade>>),
    AggTrade(Arc<dyn Handle<AggTrade>>),
    Kline(Arc<dyn Handle<Kline>>),
    MiniTicker(Arc<dyn Handle<MiniTicker>>),
    Ticker(Arc<dyn Handle<Ticker>>),
    AllMarketMiniTickers(Arc<dyn Handle<Vec<MiniTicker>>>),
    AllMarketTickers(Arc<dyn Handle<Vec<Ticker>>>),
    /// Receives every error raised while dispatching a message
    Exception(Arc<dyn Handle<Arc<Error>>>),
}

impl Handler {
    pub fn trade<H: Handle<Trade>>(handler: H) -> Self {
        Self::Trade(Arc::new(handler))
    }

    pub fn agg_trade<H: Handle<AggTrade>>(handler: H) -> Self {
        Self::AggTrade(Arc::new(handler))
    }

    pub fn kline<H: Handle<Kline>>(handler: H) -> Self {
        Self::Kline(Arc::new(handler))
    }

    pub fn mini_ticker<H: Handle<MiniTicker>>(handler: H) -> Self {
        Self::MiniTicker(Arc::new(handler))
    }

    pub fn ticker<H: Handle<Ticker>>(handler: H) -> Self {
        Self::Ticker(Arc::new(handler))
    }

    pub fn all_market_mini_tickers<H: Handle<Vec<MiniTicker>>>(handler: H) -> Self {
        Self::AllMarketMiniTickers(Arc::new(handler))
    }

    pub fn all_market_tickers<H: Handle<Vec<Ticker>>>(handler: H) -> Self {
        Self::AllMarketTickers(Arc::new(handler))
    }

    pub fn exception<H: Handle<Arc<Error>>>(handler: H) -> Self {
        Self::Exception(Arc::new(handler))
    }

    /// The family this handler belongs to, `None` for exception handlers.
    #[must_use]
    pub const fn subtype(&self) -> Option<SubType> {
        match self {
            Self::Trade(_) => Some(SubType::Trade),
            Self::AggTrade(_) => Some(SubType::AggTrade),
            Self::Kline(_) => Some(SubType::Kline),
            Self::MiniTicker(_) => Some(SubType::MiniTicker),
            Self::Ticker(_) => Some(SubType::Ticker),
            Self::AllMarketMiniTickers(_) => Some(SubType::AllMarketMiniTickers),
            Self::AllMarketTickers(_) => Some(SubType::AllMarketTickers),
            Self::Exception(_) => None,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subtype() {
            Some(subtype) => write!(f, "Handler({subtype})"),
            None => f.write_str("Handler(exception)"),
        }
    }
}

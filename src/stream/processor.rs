//! Processors: one per message family, each recognizing its pushes, encoding
//! its subscriptions and dispatching to its handlers.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::handler::{Handle, Handler};
use super::shape::SubscriptionParam;
use super::types::request::{Method, StreamRequest};
use super::types::response::{AggTrade, Kline, MiniTicker, Ticker, Trade};
use crate::Result;
use crate::error::{Error, Kind};
use crate::serde_helpers::deserialize_payload;
use crate::types::{KlineInterval, SubType};
use crate::ws::RequestSender;

const KEY_STREAM: &str = "stream";
const KEY_DATA: &str = "data";
const KEY_EVENT_TYPE: &str = "e";

/// A payload type pushed by the stream endpoint.
///
/// Pushes arrive either wrapped as `{"stream": <name>, "data": <payload>}` or
/// bare, identified by the `e` event type field (or, for all-market families,
/// by the event type of the first array element).
pub trait StreamPayload: DeserializeOwned + Send + Sync + 'static {
    const SUBTYPE: SubType;
    /// Value of the `e` field
    const EVENT_TYPE: &'static str;

    /// Stream name for a subscription, e.g. `btcusdt@trade`.
    fn stream_name(args: &[String]) -> Result<String>;

    /// Whether a stream name carries this payload.
    fn matches_stream(stream: &str) -> bool;

    /// Whether a bare push carries this payload.
    fn matches_raw(raw: &Value) -> bool {
        event_type(raw) == Some(Self::EVENT_TYPE)
    }

    /// Extract the payload if `raw` carries one of this type.
    fn recognize(raw: &Value) -> Option<Value> {
        match (
            raw.get(KEY_STREAM).and_then(Value::as_str),
            raw.get(KEY_DATA),
        ) {
            (Some(stream), Some(data)) => Self::matches_stream(stream).then(|| data.clone()),
            _ => Self::matches_raw(raw).then(|| raw.clone()),
        }
    }
}

fn event_type(raw: &Value) -> Option<&str> {
    raw.get(KEY_EVENT_TYPE).and_then(Value::as_str)
}

fn first_event_type(raw: &Value) -> Option<&str> {
    raw.as_array()?.first().and_then(event_type)
}

fn symbol(subtype: SubType, args: &[String]) -> Result<String> {
    match args {
        [symbol] if !symbol.is_empty() => Ok(symbol.to_lowercase()),
        _ => Err(Error::validation(format!(
            "`{subtype}` takes exactly one symbol, got {args:?}"
        ))),
    }
}

fn no_args(subtype: SubType, args: &[String], stream: &str) -> Result<String> {
    if args.is_empty() {
        Ok(stream.to_owned())
    } else {
        Err(Error::validation(format!(
            "`{subtype}` takes no parameters, got {args:?}"
        )))
    }
}

/// Per-symbol stream suffix that is not an all-market stream.
fn symbol_stream(stream: &str, suffix: &str) -> bool {
    !stream.starts_with('!') && stream.ends_with(suffix)
}

impl StreamPayload for Trade {
    const SUBTYPE: SubType = SubType::Trade;
    const EVENT_TYPE: &'static str = "trade";

    fn stream_name(args: &[String]) -> Result<String> {
        Ok(format!("{}@trade", symbol(Self::SUBTYPE, args)?))
    }

    fn matches_stream(stream: &str) -> bool {
        symbol_stream(stream, "@trade")
    }
}

impl StreamPayload for AggTrade {
    const SUBTYPE: SubType = SubType::AggTrade;
    const EVENT_TYPE: &'static str = "aggTrade";

    fn stream_name(args: &[String]) -> Result<String> {
        Ok(format!("{}@aggTrade", symbol(Self::SUBTYPE, args)?))
    }

    fn matches_stream(stream: &str) -> bool {
        symbol_stream(stream, "@aggTrade")
    }
}

impl StreamPayload for Kline {
    const SUBTYPE: SubType = SubType::Kline;
    const EVENT_TYPE: &'static str = "kline";

    fn stream_name(args: &[String]) -> Result<String> {
        let [interval, symbol_arg] = args else {
            return Err(Error::validation(format!(
                "`kline` takes an interval and a symbol, got {args:?}"
            )));
        };
        let interval: KlineInterval = interval
            .parse()
            .map_err(|e| Error::with_source(Kind::Validation, e))?;
        let symbol = symbol(Self::SUBTYPE, std::slice::from_ref(symbol_arg))?;

        Ok(format!("{symbol}@kline_{interval}"))
    }

    fn matches_stream(stream: &str) -> bool {
        stream.contains("@kline_")
    }
}

impl StreamPayload for MiniTicker {
    const SUBTYPE: SubType = SubType::MiniTicker;
    const EVENT_TYPE: &'static str = "24hrMiniTicker";

    fn stream_name(args: &[String]) -> Result<String> {
        Ok(format!("{}@miniTicker", symbol(Self::SUBTYPE, args)?))
    }

    fn matches_stream(stream: &str) -> bool {
        symbol_stream(stream, "@miniTicker")
    }
}

impl StreamPayload for Ticker {
    const SUBTYPE: SubType = SubType::Ticker;
    const EVENT_TYPE: &'static str = "24hrTicker";

    fn stream_name(args: &[String]) -> Result<String> {
        Ok(format!("{}@ticker", symbol(Self::SUBTYPE, args)?))
    }

    fn matches_stream(stream: &str) -> bool {
        symbol_stream(stream, "@ticker")
    }
}

impl StreamPayload for Vec<MiniTicker> {
    const SUBTYPE: SubType = SubType::AllMarketMiniTickers;
    const EVENT_TYPE: &'static str = MiniTicker::EVENT_TYPE;

    fn stream_name(args: &[String]) -> Result<String> {
        no_args(Self::SUBTYPE, args, "!miniTicker@arr")
    }

    fn matches_stream(stream: &str) -> bool {
        stream == "!miniTicker@arr"
    }

    fn matches_raw(raw: &Value) -> bool {
        first_event_type(raw) == Some(Self::EVENT_TYPE)
    }
}

impl StreamPayload for Vec<Ticker> {
    const SUBTYPE: SubType = SubType::AllMarketTickers;
    const EVENT_TYPE: &'static str = Ticker::EVENT_TYPE;

    fn stream_name(args: &[String]) -> Result<String> {
        no_args(Self::SUBTYPE, args, "!ticker@arr")
    }

    fn matches_stream(stream: &str) -> bool {
        stream == "!ticker@arr"
    }

    fn matches_raw(raw: &Value) -> bool {
        first_event_type(raw) == Some(Self::EVENT_TYPE)
    }
}

/// Handlers of one payload type, called in registration order.
pub struct Channel<T: Send + Sync + 'static> {
    handlers: RwLock<Vec<Arc<dyn Handle<T>>>>,
}

impl<T: StreamPayload> Channel<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    fn push(&self, handler: Arc<dyn Handle<T>>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    fn snapshot(&self) -> Vec<Arc<dyn Handle<T>>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deserialize the payload and hand it to every handler, stopping at the
    /// first failure.
    async fn dispatch(&self, payload: Value) -> Result<()> {
        let payload: T = deserialize_payload(payload)?;

        for handler in self.snapshot() {
            handler
                .handle(&payload)
                .await
                .map_err(|e| Error::handler(T::SUBTYPE, e))?;
        }

        Ok(())
    }
}

impl<T: StreamPayload> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A processor for one message family.
#[non_exhaustive]
pub enum Processor {
    Trade(Channel<Trade>),
    AggTrade(Channel<AggTrade>),
    Kline(Channel<Kline>),
    MiniTicker(Channel<MiniTicker>),
    Ticker(Channel<Ticker>),
    AllMarketMiniTickers(Channel<Vec<MiniTicker>>),
    AllMarketTickers(Channel<Vec<Ticker>>),
}

/// Run `$body` with `$channel` bound to the processor's typed channel.
macro_rules! with_channel {
    ($processor:expr, $channel:ident => $body:expr) => {
        match $processor {
            Processor::Trade($channel) => $body,
            Processor::AggTrade($channel) => $body,
            Processor::Kline($channel) => $body,
            Processor::MiniTicker($channel) => $body,
            Processor::Ticker($channel) => $body,
            Processor::AllMarketMiniTickers($channel) => $body,
            Processor::AllMarketTickers($channel) => $body,
        }
    };
}

impl Processor {
    /// Create an empty processor for `subtype`.
    #[must_use]
    pub fn new(subtype: SubType) -> Self {
        match subtype {
            SubType::Trade => Self::Trade(Channel::new()),
            SubType::AggTrade => Self::AggTrade(Channel::new()),
            SubType::Kline => Self::Kline(Channel::new()),
            SubType::MiniTicker => Self::MiniTicker(Channel::new()),
            SubType::Ticker => Self::Ticker(Channel::new()),
            SubType::AllMarketMiniTickers => Self::AllMarketMiniTickers(Channel::new()),
            SubType::AllMarketTickers => Self::AllMarketTickers(Channel::new()),
        }
    }

    /// One processor for every known family.
    #[must_use]
    pub fn registry() -> Vec<Self> {
        SubType::ALL.into_iter().map(Self::new).collect()
    }

    #[must_use]
    pub fn subtype(&self) -> SubType {
        fn subtype_of<T: StreamPayload>(_: &Channel<T>) -> SubType {
            T::SUBTYPE
        }

        with_channel!(self, channel => subtype_of(channel))
    }

    #[must_use]
    pub fn supports_handler(&self, handler: &Handler) -> bool {
        handler.subtype() == Some(self.subtype())
    }

    /// Add a handler this processor supports. Returns `false`, dropping the
    /// handler, if it belongs to another family.
    pub fn add_handler(&self, handler: Handler) -> bool {
        match (self, handler) {
            (Self::Trade(channel), Handler::Trade(h)) => channel.push(h),
            (Self::AggTrade(channel), Handler::AggTrade(h)) => channel.push(h),
            (Self::Kline(channel), Handler::Kline(h)) => channel.push(h),
            (Self::MiniTicker(channel), Handler::MiniTicker(h)) => channel.push(h),
            (Self::Ticker(channel), Handler::Ticker(h)) => channel.push(h),
            (Self::AllMarketMiniTickers(channel), Handler::AllMarketMiniTickers(h)) => {
                channel.push(h);
            }
            (Self::AllMarketTickers(channel), Handler::AllMarketTickers(h)) => channel.push(h),
            _ => return false,
        }
        true
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        with_channel!(self, channel => channel.handler_count())
    }

    #[must_use]
    pub fn supports_subtype(&self, subtype: SubType) -> bool {
        self.subtype() == subtype
    }

    /// Stream name for `args`, validated without touching the network.
    pub fn stream_name(&self, args: &[String]) -> Result<String> {
        fn name_of<T: StreamPayload>(_: &Channel<T>, args: &[String]) -> Result<String> {
            T::stream_name(args)
        }

        with_channel!(self, channel => name_of(channel, args))
    }

    /// Encode `param` as a `method` request and send it, returning the reply.
    pub async fn subscribe_param(
        &self,
        sender: &dyn RequestSender,
        method: Method,
        param: &SubscriptionParam,
    ) -> Result<Value> {
        if !self.supports_subtype(param.subtype) {
            return Err(Error::unsupported_subtype(param.subtype.to_string()));
        }

        let stream = self.stream_name(&param.args)?;
        let request = serde_json::to_value(StreamRequest::new(method, vec![stream]))?;
        sender.send_request(request).await
    }

    /// The payload carried by `raw`, if it belongs to this family.
    #[must_use]
    pub fn is_message_type(&self, raw: &Value) -> Option<Value> {
        fn recognize<T: StreamPayload>(_: &Channel<T>, raw: &Value) -> Option<Value> {
            T::recognize(raw)
        }

        with_channel!(self, channel => recognize(channel, raw))
    }

    /// Hand a recognized payload to this processor's handlers.
    pub async fn dispatch(&self, payload: Value) -> Result<()> {
        with_channel!(self, channel => channel.dispatch(payload).await)
    }
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("subtype", &self.subtype())
            .field("handlers", &self.handler_count())
            .finish()
    }
}

/// Receives every error raised while dispatching a message.
pub struct ExceptionProcessor {
    handlers: RwLock<Vec<Arc<dyn Handle<Arc<Error>>>>>,
}

impl ExceptionProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn supports_handler(&self, handler: &Handler) -> bool {
        matches!(handler, Handler::Exception(_))
    }

    pub fn add_handler(&self, handler: Handler) -> bool {
        let Handler::Exception(handler) = handler else {
            return false;
        };
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
        true
    }

    /// Hand `error` to every exception handler. Without any, the error is logged.
    pub async fn dispatch(&self, error: Error) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if handlers.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %error, "Unhandled error while dispatching stream message");
            #[cfg(not(feature = "tracing"))]
            let _ = &error;
            return;
        }

        let error = Arc::new(error);
        for handler in handlers {
            if let Err(e) = handler.handle(&error).await {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %e, "Exception handler failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }
}

impl Default for ExceptionProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExceptionProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("ExceptionProcessor")
            .field("handlers", &handlers)
            .finish()
    }
}

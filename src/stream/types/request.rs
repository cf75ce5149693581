use serde::Serialize;
use strum_macros::Display;

/// Request methods understood by the stream endpoint.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    Subscribe,
    Unsubscribe,
    ListSubscriptions,
}

/// Request frame sent to the stream endpoint.
///
/// The `id` field is added by the connection manager when the request is sent.
#[non_exhaustive]
#[derive(Clone, Debug, Serialize)]
pub struct StreamRequest {
    pub method: Method,
    /// Stream names, e.g. `btcusdt@kline_1m`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
}

impl StreamRequest {
    #[must_use]
    pub fn new(method: Method, params: Vec<String>) -> Self {
        Self { method, params }
    }

    /// Create a `SUBSCRIBE` request for the given streams.
    #[must_use]
    pub fn subscribe(streams: Vec<String>) -> Self {
        Self::new(Method::Subscribe, streams)
    }

    /// Create an `UNSUBSCRIBE` request for the given streams.
    #[must_use]
    pub fn unsubscribe(streams: Vec<String>) -> Self {
        Self::new(Method::Unsubscribe, streams)
    }

    #[must_use]
    pub fn list_subscriptions() -> Self {
        Self::new(Method::ListSubscriptions, Vec::new())
    }
}

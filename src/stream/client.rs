use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashSet;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use super::handler::Handler;
use super::processor::Processor;
use super::router::Router;
use super::shape::Shapes;
use super::types::request::{Method, StreamRequest};
use crate::Result;
use crate::error::Error;
use crate::ws::config::Config;
use crate::ws::connection::{ConnectionManager, ConnectionState};
use crate::ws::retry::RetryPolicy;
use crate::ws::traits::ConnectionHooks;

/// Combined market stream endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://stream.binance.com:9443/stream";

type Connection = ConnectionManager<Router, SubscriptionLedger>;

/// Client for Binance market data streams.
///
/// Register handlers, connect, then subscribe with shapes; pushes are delivered
/// to the handlers of their family. Streams subscribed through the client are
/// subscribed again after every reconnection.
///
/// # Examples
///
/// ```rust, no_run
/// use std::time::Duration;
///
/// use binance_stream::error::BoxError;
/// use binance_stream::stream::{Client, Handler, Trade, handler_fn};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::default();
///
///     client.handler(Handler::trade(handler_fn(|trade: Trade| async move {
///         println!("{} {} @ {}", trade.symbol, trade.quantity, trade.price);
///         Ok::<(), BoxError>(())
///     })))?;
///
///     client.connect();
///     client.subscribe(("trade", ["BTCUSDT", "ETHUSDT"])).await?;
///
///     tokio::time::sleep(Duration::from_secs(60)).await;
///     client.close().await?;
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT, Config::default())
            .expect("Stream client with default endpoint should succeed")
    }
}

struct ClientInner {
    /// Endpoint the connection is opened against
    endpoint: String,
    /// Connection manager feeding inbound pushes to `router`
    connection: Connection,
    /// Processors and handlers
    router: Arc<Router>,
    /// Streams to re-subscribe after a reconnection
    ledger: Arc<SubscriptionLedger>,
    /// Task re-subscribing on reconnection, one per connection
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Create a client with every built-in processor, reconnecting according
    /// to `config.reconnect`.
    ///
    /// Nothing is sent until [`connect`](Self::connect).
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        Self::with_processors(endpoint, config, Processor::registry())
    }

    /// Create a client restricted to the given processors.
    pub fn with_processors(
        endpoint: &str,
        config: Config,
        processors: Vec<Processor>,
    ) -> Result<Self> {
        let policy = config.reconnect.clone();
        Self::build(endpoint, config, policy, processors)
    }

    /// Create a client whose reconnections follow a custom [`RetryPolicy`].
    pub fn with_retry_policy<R: RetryPolicy>(
        endpoint: &str,
        config: Config,
        policy: R,
    ) -> Result<Self> {
        Self::build(endpoint, config, policy, Processor::registry())
    }

    fn build<R: RetryPolicy>(
        endpoint: &str,
        config: Config,
        policy: R,
        processors: Vec<Processor>,
    ) -> Result<Self> {
        let url = Url::parse(endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::validation(format!(
                "stream endpoint must use ws or wss, got `{endpoint}`"
            )));
        }

        let router = Arc::new(Router::new(processors));
        let ledger = Arc::new(SubscriptionLedger::default());
        let connection = ConnectionManager::with_policy(
            endpoint.to_owned(),
            config,
            policy,
            Arc::clone(&router),
            Arc::clone(&ledger),
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                endpoint: endpoint.to_owned(),
                connection,
                router,
                ledger,
                watcher: Mutex::new(None),
            }),
        })
    }

    /// Register a handler with the processor of its family.
    ///
    /// Fails with [`Kind::Validation`](crate::error::Kind::Validation) if no
    /// processor of this client accepts it.
    pub fn handler(&self, handler: Handler) -> Result<()> {
        let description = format!("{handler:?}");
        if self.inner.router.register(handler) {
            Ok(())
        } else {
            Err(Error::validation(format!(
                "no processor of this client accepts {description}"
            )))
        }
    }

    /// Start connecting in the background. Returns immediately.
    ///
    /// Subscribe calls made before the socket opens wait for it.
    pub fn connect(&self) {
        if self.inner.connection.connect() {
            self.start_reconnection_handler();
        }
    }

    /// Start the reconnection handler that re-subscribes on connection recovery.
    fn start_reconnection_handler(&self) {
        let connection = self.inner.connection.clone();
        let ledger = Arc::clone(&self.inner.ledger);
        let mut state_rx = connection.state_receiver();
        let mut was_open = state_rx.borrow().is_open();

        let handle = tokio::spawn(async move {
            loop {
                // Wait for next state change
                if state_rx.changed().await.is_err() {
                    break;
                }

                let state = *state_rx.borrow_and_update();

                match state {
                    ConnectionState::Open { .. } => {
                        if was_open {
                            #[cfg(feature = "tracing")]
                            tracing::debug!("Stream reconnected, re-establishing subscriptions");
                            resubscribe_all(&connection, &ledger).await;
                        }
                        was_open = true;
                    }
                    ConnectionState::Disconnected => {
                        // Closed or abandoned by the retry policy
                        break;
                    }
                    _ => {}
                }
            }
        });

        let previous = self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Subscribe to every stream `shapes` expands to.
    ///
    /// All requests are sent concurrently; once all of them settled the replies
    /// are returned in expansion order, or the first error is. Streams that
    /// were acknowledged are remembered for re-subscription either way.
    ///
    /// ```rust, ignore
    /// client.subscribe(("allMarketTickers",)).await?;
    /// client.subscribe((["trade", "aggTrade"], ["BTCUSDT", "ETHUSDT"])).await?;
    /// client.subscribe(("kline", ["1m", "1h"], "BNBUSDT")).await?;
    /// ```
    pub async fn subscribe<S: Into<Shapes>>(&self, shapes: S) -> Result<Vec<Value>> {
        let outcomes = self
            .inner
            .router
            .fan_out(&self.inner.connection, Method::Subscribe, shapes.into())
            .await?;

        settle(outcomes, |stream| self.inner.ledger.record(stream))
    }

    /// Unsubscribe from every stream `shapes` expands to.
    pub async fn unsubscribe<S: Into<Shapes>>(&self, shapes: S) -> Result<Vec<Value>> {
        let outcomes = self
            .inner
            .router
            .fan_out(&self.inner.connection, Method::Unsubscribe, shapes.into())
            .await?;

        settle(outcomes, |stream| self.inner.ledger.forget(&stream))
    }

    /// Streams the service reports as subscribed on the current connection.
    pub async fn list_subscriptions(&self) -> Result<Vec<String>> {
        let reply = self
            .inner
            .connection
            .send(&StreamRequest::list_subscriptions())
            .await?;

        match reply {
            Value::Null => Ok(Vec::new()),
            streams => Ok(serde_json::from_value(streams)?),
        }
    }

    /// Close the connection with the configured close code.
    ///
    /// Fails with [`Kind::Disconnected`](crate::error::Kind::Disconnected) if
    /// the client is not connected. Forgets every subscribed stream.
    pub async fn close(&self) -> Result<()> {
        self.inner.connection.close().await
    }

    /// Close the connection, sending `code` in the close frame.
    pub async fn close_with_code(&self, code: u16) -> Result<()> {
        self.inner.connection.close_with_code(code).await
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.state_receiver()
    }

    /// Streams that will be re-subscribed after a reconnection, sorted.
    #[must_use]
    pub fn subscribed_streams(&self) -> Vec<String> {
        self.inner.ledger.streams()
    }

    #[must_use]
    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }
}

/// Apply `on_success` to every acknowledged stream and fold the outcomes.
fn settle<F: FnMut(String)>(
    outcomes: Vec<(String, Result<Value>)>,
    mut on_success: F,
) -> Result<Vec<Value>> {
    let mut replies = Vec::with_capacity(outcomes.len());
    let mut first_error: Option<Error> = None;

    for (stream, outcome) in outcomes {
        match outcome {
            Ok(reply) => {
                on_success(stream);
                replies.push(reply);
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%stream, error = %e, "Stream request failed");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(replies),
    }
}

/// Re-send one `SUBSCRIBE` carrying every remembered stream.
async fn resubscribe_all(connection: &Connection, ledger: &SubscriptionLedger) {
    let streams = ledger.streams();
    if streams.is_empty() {
        return;
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(count = streams.len(), "Re-subscribing streams");

    if let Err(e) = connection.send(&StreamRequest::subscribe(streams)).await {
        #[cfg(feature = "tracing")]
        tracing::warn!(%e, "Failed to re-subscribe streams");
        #[cfg(not(feature = "tracing"))]
        let _ = &e;
    }
}

/// Streams subscribed through a [`Client`], cleared when the client closes.
#[derive(Debug, Default)]
pub struct SubscriptionLedger {
    streams: DashSet<String>,
}

impl SubscriptionLedger {
    fn record(&self, stream: String) {
        self.streams.insert(stream);
    }

    fn forget(&self, stream: &str) {
        self.streams.remove(stream);
    }

    /// Remembered streams, sorted.
    #[must_use]
    pub fn streams(&self) -> Vec<String> {
        let mut streams: Vec<String> = self.streams.iter().map(|s| s.key().clone()).collect();
        streams.sort_unstable();
        streams
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[async_trait]
impl ConnectionHooks for SubscriptionLedger {
    async fn before_reconnect(&self, attempt: u32) {
        #[cfg(feature = "tracing")]
        tracing::debug!(attempt, streams = self.len(), "Reconnecting stream");
        #[cfg(not(feature = "tracing"))]
        let _ = attempt;
    }

    fn after_close(&self) {
        self.streams.clear();
    }
}

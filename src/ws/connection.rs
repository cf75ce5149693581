#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use super::config::Config;
use super::error::WsError;
use super::pending::PendingRequests;
use super::retry::RetryPolicy;
use super::traits::{ConnectionHooks, MessageHandler, NoHooks, RequestSender};
use crate::Result;
use crate::error::{Error, Kind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outcome delivered to a caller waiting on a correlated reply.
type Reply = std::result::Result<Value, WsError>;

const KEY_ID: &str = "id";
const KEY_RESULT: &str = "result";
const KEY_ERROR: &str = "error";

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Socket is open
    Open {
        /// When the connection was established
        since: Instant,
    },
    /// Waiting to reconnect after a failure
    Reconnecting {
        /// Current reconnection attempt number
        attempt: u32,
    },
    /// `close` is shutting the socket down
    Closing,
}

impl ConnectionState {
    /// Check if the socket is currently open.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// A request queued for the connection task.
struct Outbound {
    id: u64,
    frame: String,
    reply: oneshot::Sender<Reply>,
}

/// Entry point for requests. `tx` is `Some` from `connect` until the stream is
/// closed or the retry policy gives up.
struct Outlet {
    tx: Option<mpsc::UnboundedSender<Outbound>>,
    next_id: u64,
}

struct Task {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

struct Inner<C, H> {
    endpoint: String,
    config: Config,
    policy: Box<dyn RetryPolicy>,
    on_message: Arc<C>,
    hooks: Arc<H>,
    state_tx: watch::Sender<ConnectionState>,
    outlet: Mutex<Outlet>,
    task: Mutex<Option<Task>>,
    /// Set while `close` runs so a close-induced disconnect never reconnects
    closing: AtomicBool,
    close_code: AtomicU16,
    /// Bumped by every `connect`; a task only publishes while it is current
    generation: AtomicU64,
}

impl<C, H> Inner<C, H> {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Publish `state` on behalf of the task started as `generation`, unless a
    /// later `connect` has replaced it.
    fn set_task_state(&self, generation: u64, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if !self.is_current(generation) {
                return false;
            }
            *current = state;
            true
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn is_closing(&self, cancel: &CancellationToken) -> bool {
        self.closing.load(Ordering::Acquire) || cancel.is_cancelled()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Neither guarded value can be left half-updated by a panic.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the stream socket: connects, reconnects, correlates replies and closes.
///
/// The socket, the retry counter and the pending-request table live inside a
/// single background task started by [`connect`](Self::connect). Callers talk
/// to it through a queue, so requests issued while a connection attempt is in
/// flight wait until the socket opens.
///
/// Frames carrying an integer `id` are replies: they resolve the matching
/// [`send`](Self::send) and are never seen by the message handler. Every other
/// well-formed frame is passed to the [`MessageHandler`].
///
/// # Example
///
/// ```ignore
/// let connection = ConnectionManager::new(
///     "wss://stream.binance.com:9443/stream".to_owned(),
///     Config::default(),
///     Arc::new(router),
///     Arc::new(NoHooks),
/// );
/// connection.connect();
///
/// let reply = connection
///     .send(&json!({"method": "SUBSCRIBE", "params": ["btcusdt@trade"]}))
///     .await?;
/// ```
pub struct ConnectionManager<C, H = NoHooks> {
    inner: Arc<Inner<C, H>>,
}

impl<C, H> Clone for ConnectionManager<C, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, H> fmt::Debug for ConnectionManager<C, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &*self.inner.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl<C, H> ConnectionManager<C, H>
where
    C: MessageHandler,
    H: ConnectionHooks,
{
    /// Create a manager that reconnects according to `config.reconnect`.
    ///
    /// Nothing happens on the network until [`connect`](Self::connect).
    pub fn new(endpoint: String, config: Config, on_message: Arc<C>, hooks: Arc<H>) -> Self {
        let policy = config.reconnect.clone();
        Self::with_policy(endpoint, config, policy, on_message, hooks)
    }

    /// Create a manager driven by a custom [`RetryPolicy`].
    pub fn with_policy<R: RetryPolicy>(
        endpoint: String,
        config: Config,
        policy: R,
        on_message: Arc<C>,
        hooks: Arc<H>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(Inner {
                endpoint,
                config,
                policy: Box::new(policy),
                on_message,
                hooks,
                state_tx,
                outlet: Mutex::new(Outlet {
                    tx: None,
                    next_id: 0,
                }),
                task: Mutex::new(None),
                closing: AtomicBool::new(false),
                close_code: AtomicU16::new(0),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Start connecting in the background. Returns immediately.
    ///
    /// Calling this while a connection (or a connection attempt) is alive is a
    /// no-op that returns `false`. Calling it while [`close`](Self::close) is
    /// still shutting the previous socket down starts a new connection that the
    /// pending close leaves alone. Must be called from within a Tokio runtime.
    pub fn connect(&self) -> bool {
        let mut task = lock(&self.inner.task);
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return false;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.outlet).tx = Some(tx);
        self.inner.closing.store(false, Ordering::Release);
        self.inner.set_state(ConnectionState::Connecting);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Self::connection_loop(
            Arc::clone(&self.inner),
            generation,
            rx,
            cancel.clone(),
        ));
        *task = Some(Task { handle, cancel });
        true
    }

    /// Main connection loop with automatic reconnection.
    async fn connection_loop(
        inner: Arc<Inner<C, H>>,
        generation: u64,
        mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
        cancel: CancellationToken,
    ) {
        let mut attempt = 0_u32;

        loop {
            let connected = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                result = connect_async(inner.endpoint.as_str()) => result,
            };

            match connected {
                Ok((ws_stream, _)) => {
                    attempt = 0;
                    inner.set_task_state(
                        generation,
                        ConnectionState::Open {
                            since: Instant::now(),
                        },
                    );
                    #[cfg(feature = "tracing")]
                    tracing::debug!(endpoint = %inner.endpoint, "Stream connected");

                    match Self::handle_connection(&inner, ws_stream, &mut outbound_rx, &cancel)
                        .await
                    {
                        Ok(()) => return,
                        Err(e) => {
                            // A flood of inbound frames can turn a requested close into an
                            // abnormal disconnect; it is still a close.
                            if inner.is_closing(&cancel) {
                                return;
                            }
                            #[cfg(feature = "tracing")]
                            tracing::warn!(error = %e, "Stream disconnected");
                            #[cfg(not(feature = "tracing"))]
                            let _ = &e;
                        }
                    }
                }
                Err(e) => {
                    if inner.is_closing(&cancel) {
                        return;
                    }
                    let error = Error::with_source(Kind::WebSocket, WsError::Connection(e));
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Unable to connect: {error:?}");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &error;
                }
            }

            let decision = inner.policy.decide(attempt);
            if decision.abandon {
                #[cfg(feature = "tracing")]
                tracing::warn!(attempt, "Retry policy abandoned reconnection");
                Self::abandon(&inner, generation, &mut outbound_rx);
                return;
            }

            attempt = if decision.reset {
                0
            } else {
                attempt.saturating_add(1)
            };
            inner.set_task_state(generation, ConnectionState::Reconnecting { attempt });

            if let Some(delay) = decision.delay {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    () = sleep(delay) => {}
                }
            }

            inner.hooks.before_reconnect(attempt).await;
            inner.set_task_state(generation, ConnectionState::Connecting);
        }
    }

    /// Give up for good: new sends fail fast and queued ones are released.
    fn abandon(
        inner: &Inner<C, H>,
        generation: u64,
        outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>,
    ) {
        {
            let mut outlet = lock(&inner.outlet);
            if inner.is_current(generation) {
                outlet.tx = None;
            }
        }
        outbound_rx.close();

        let mut abandoned = 0_usize;
        while let Ok(request) = outbound_rx.try_recv() {
            drop(request);
            abandoned += 1;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(abandoned, "Released requests waiting for a connection");
        #[cfg(not(feature = "tracing"))]
        let _ = abandoned;

        inner.set_task_state(generation, ConnectionState::Disconnected);
    }

    /// Drive one open socket until it fails or the task is cancelled.
    ///
    /// Returns `Ok` only when the socket was shut down because of `close`.
    async fn handle_connection(
        inner: &Inner<C, H>,
        ws_stream: WsStream,
        outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (mut write, mut read) = ws_stream.split();
        let mut pending = PendingRequests::<Reply>::default();

        let read_timeout = inner.config.timeout;
        let idle = sleep(read_timeout);
        tokio::pin!(idle);

        let result = loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    let frame = CloseFrame {
                        code: CloseCode::from(inner.close_code.load(Ordering::Acquire)),
                        reason: "".into(),
                    };
                    let shutdown = async {
                        write.send(Message::Close(Some(frame))).await?;
                        write.close().await
                    };

                    match timeout(inner.config.close_timeout, shutdown).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            #[cfg(feature = "tracing")]
                            tracing::error!(error = %e, "Error while closing stream socket");
                            #[cfg(not(feature = "tracing"))]
                            let _ = &e;
                        }
                        Err(_elapsed) => {
                            #[cfg(feature = "tracing")]
                            tracing::error!(
                                "Stream socket did not close within {:?}",
                                inner.config.close_timeout
                            );
                        }
                    }

                    break Ok(());
                }

                frame = read.next() => {
                    idle.as_mut().reset(time::Instant::now() + read_timeout);

                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(%text, "Received WebSocket text message");
                            Self::handle_frame(inner, &mut pending, text.as_bytes()).await;
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            Self::handle_frame(inner, &mut pending, &bytes).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            break Err(WsError::ConnectionClosed.into());
                        }
                        Some(Ok(_)) => {
                            // PING is answered by tungstenite, PONG only proves liveness.
                        }
                        Some(Err(e)) => break Err(e.into()),
                    }
                }

                Some(request) = outbound_rx.recv() => {
                    let Outbound { id, frame, reply } = request;
                    pending.insert(id, reply);

                    if let Err(e) = write.send(Message::Text(frame.into())).await {
                        pending.remove(id);
                        break Err(e.into());
                    }
                }

                () = &mut idle => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("No frame within {read_timeout:?}, sending PING");

                    if let Err(e) = write.send(Message::Ping(Default::default())).await {
                        break Err(e.into());
                    }
                    idle.as_mut().reset(time::Instant::now() + read_timeout);
                }
            }
        };

        let abandoned = pending.clear();
        #[cfg(feature = "tracing")]
        if abandoned > 0 {
            tracing::debug!(abandoned, "Dropped requests still waiting for a reply");
        }
        #[cfg(not(feature = "tracing"))]
        let _ = abandoned;

        result
    }

    /// Route one inbound frame: correlated reply first, then the message handler.
    async fn handle_frame(inner: &Inner<C, H>, pending: &mut PendingRequests<Reply>, bytes: &[u8]) {
        let message: Value = match serde_json::from_slice(bytes) {
            Ok(message) => message,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    frame = %String::from_utf8_lossy(bytes),
                    error = %e,
                    "Stream message is not valid JSON, dropping it"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                return;
            }
        };

        match message.get(KEY_ID).and_then(Value::as_u64) {
            Some(id) => {
                if !pending.resolve(id, reply_from(message)) {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(id, "Reply for unknown request id ignored");
                }
            }
            None => inner.on_message.on_message(message).await,
        }
    }

    /// Send a request and wait for the reply carrying the same id.
    ///
    /// The request must serialize to a JSON object; its `id` field is
    /// overwritten with the next id of this manager. If the socket is not open
    /// yet the request waits for it. Fails with [`Kind::Disconnected`] when the
    /// manager is neither connected nor connecting, and with
    /// [`WsError::ConnectionClosed`] when the connection goes away before the
    /// reply arrives.
    pub async fn send<R: Serialize + ?Sized>(&self, request: &R) -> Result<Value> {
        let mut payload = serde_json::to_value(request)?;
        if !payload.is_object() {
            return Err(Error::validation(
                "stream requests must serialize to a JSON object",
            ));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            // Ids are handed out under the same lock that enqueues, so the
            // socket sees them in issuance order.
            let mut outlet = lock(&self.inner.outlet);
            let Outlet { tx, next_id } = &mut *outlet;
            let Some(tx) = tx.as_ref() else {
                return Err(self.disconnected());
            };

            let id = *next_id;
            *next_id = next_id.wrapping_add(1);
            payload[KEY_ID] = Value::from(id);

            tx.send(Outbound {
                id,
                frame: payload.to_string(),
                reply: reply_tx,
            })
            .map_err(|_e| self.disconnected())?;
        }

        match reply_rx.await {
            Ok(reply) => Ok(reply?),
            Err(_dropped) => Err(WsError::ConnectionClosed.into()),
        }
    }

    /// Close the stream with the configured close code.
    pub async fn close(&self) -> Result<()> {
        self.close_with_code(self.inner.config.close_code).await
    }

    /// Close the stream, sending `code` in the close frame.
    ///
    /// Fails with [`Kind::Disconnected`] if the stream was never connected or
    /// is already closed. Errors while shutting the socket down are logged,
    /// not returned. A [`connect`](Self::connect) issued while the close is in
    /// progress is not undone by it.
    pub async fn close_with_code(&self, code: u16) -> Result<()> {
        let (Task { handle, .. }, generation) = {
            let mut task = lock(&self.inner.task);
            let Some(closed) = task.take() else {
                return Err(self.disconnected());
            };

            self.inner.closing.store(true, Ordering::Release);
            self.inner.close_code.store(code, Ordering::Release);
            self.inner.set_state(ConnectionState::Closing);
            closed.cancel.cancel();

            (closed, self.inner.generation.load(Ordering::Acquire))
        };

        if let Err(e) = handle.await {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %e, "Stream task failed while closing");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }

        {
            // Holding the task lock keeps `connect` out while the shared state
            // is reset; a connection it started in the meantime stays untouched.
            let _task = lock(&self.inner.task);
            if self.inner.is_current(generation) {
                lock(&self.inner.outlet).tx = None;
                self.inner.set_state(ConnectionState::Disconnected);
                self.inner.closing.store(false, Ordering::Release);
            }
        }

        self.inner.hooks.after_close();

        Ok(())
    }

    fn disconnected(&self) -> Error {
        Error::disconnected(self.inner.endpoint.as_str())
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    ///
    /// This is useful for detecting reconnections and re-establishing subscriptions.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }
}

#[async_trait]
impl<C, H> RequestSender for ConnectionManager<C, H>
where
    C: MessageHandler,
    H: ConnectionHooks,
{
    async fn send_request(&self, request: Value) -> Result<Value> {
        self.send(&request).await
    }
}

/// Turn a correlated reply frame into the caller's result.
fn reply_from(mut message: Value) -> Reply {
    if let Some(error) = message.get(KEY_ERROR).filter(|e| !e.is_null()) {
        return Err(WsError::Rejected {
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        });
    }

    Ok(message
        .get_mut(KEY_RESULT)
        .map(Value::take)
        .unwrap_or_default())
}

#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use binance_stream::error::{BoxError, Error, Kind};
use binance_stream::stream::{Client, Handler, Kline, Trade, handler_fn};
use binance_stream::ws::{Config, ConnectionState, ReconnectConfig, RetryDecision, WsError};
use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(2);

const MODE_REPLY: u8 = 0;
const MODE_REJECT: u8 = 1;
const MODE_SILENT: u8 = 2;

/// Something the server observed besides a request.
#[derive(Debug, PartialEq, Eq)]
enum Event {
    Ping,
    Close(Option<u16>),
}

/// State shared by every connection of a [`MockStreamServer`].
struct Shared {
    /// Pushes broadcast to all connected clients
    push_tx: broadcast::Sender<String>,
    /// Makes every live connection drop its socket without a close handshake
    drop_tx: broadcast::Sender<()>,
    request_tx: mpsc::UnboundedSender<Value>,
    event_tx: mpsc::UnboundedSender<Event>,
    mode: AtomicU8,
    connections: AtomicUsize,
}

impl Shared {
    /// Answer a request the way the stream service does, tracking the
    /// connection's subscriptions in `streams`.
    fn reply(&self, request: &Value, streams: &mut Vec<String>) -> Option<Value> {
        let id = request["id"].clone();

        match self.mode.load(Ordering::SeqCst) {
            MODE_SILENT => None,
            MODE_REJECT => Some(json!({
                "error": {"code": 2, "msg": "Invalid request: unknown stream"},
                "id": id
            })),
            _ => {
                let params: Vec<String> = request["params"]
                    .as_array()
                    .map(|params| {
                        params
                            .iter()
                            .filter_map(|p| p.as_str().map(str::to_owned))
                            .collect()
                    })
                    .unwrap_or_default();

                let result = match request["method"].as_str() {
                    Some("SUBSCRIBE") => {
                        for param in params {
                            if !streams.contains(&param) {
                                streams.push(param);
                            }
                        }
                        Value::Null
                    }
                    Some("UNSUBSCRIBE") => {
                        streams.retain(|s| !params.contains(s));
                        Value::Null
                    }
                    Some("LIST_SUBSCRIPTIONS") => json!(streams),
                    _ => Value::Null,
                };

                Some(json!({"result": result, "id": id}))
            }
        }
    }

    async fn serve(&self, ws_stream: WebSocketStream<TcpStream>) {
        let (mut write, mut read) = ws_stream.split();
        let mut push_rx = self.push_tx.subscribe();
        let mut drop_rx = self.drop_tx.subscribe();
        let mut streams = Vec::new();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let request: Value = serde_json::from_str(text.as_str()).unwrap();
                            let reply = self.reply(&request, &mut streams);
                            drop(self.request_tx.send(request));

                            if let Some(reply) = reply
                                && write.send(Message::Text(reply.to_string().into())).await.is_err()
                            {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(_))) => drop(self.event_tx.send(Event::Ping)),
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.map(|f| u16::from(f.code));
                            drop(self.event_tx.send(Event::Close(code)));
                            break;
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    }
                }
                msg = push_rx.recv() => {
                    match msg {
                        Ok(text) => {
                            if write.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = drop_rx.recv() => break,
            }
        }
    }
}

/// Mock stream service answering `SUBSCRIBE`, `UNSUBSCRIBE` and
/// `LIST_SUBSCRIPTIONS`, and pushing whatever the test sends.
struct MockStreamServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    request_rx: mpsc::UnboundedReceiver<Value>,
    event_rx: mpsc::UnboundedReceiver<Event>,
    gate: watch::Sender<bool>,
}

impl MockStreamServer {
    /// Start a server on a random port that completes handshakes right away.
    async fn start() -> Self {
        let server = Self::start_gated().await;
        server.open_gate();
        server
    }

    /// Start a server that holds every handshake until [`open_gate`](Self::open_gate).
    async fn start_gated() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (push_tx, _) = broadcast::channel::<String>(4096);
        let (drop_tx, _) = broadcast::channel::<()>(4);
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (gate, mut gate_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            push_tx,
            drop_tx,
            request_tx,
            event_tx,
            mode: AtomicU8::new(MODE_REPLY),
            connections: AtomicUsize::new(0),
        });

        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            let opened = gate_rx.wait_for(|open| *open).await.is_ok();
            if !opened {
                return;
            }

            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };

                accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                let shared = Arc::clone(&accept_shared);
                tokio::spawn(async move { shared.serve(ws_stream).await });
            }
        });

        Self {
            addr,
            shared,
            request_rx,
            event_rx,
            gate,
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/stream", self.addr)
    }

    fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    fn set_mode(&self, mode: u8) {
        self.shared.mode.store(mode, Ordering::SeqCst);
    }

    fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Push a frame to every connected client.
    fn push(&self, frame: &Value) {
        drop(self.shared.push_tx.send(frame.to_string()));
    }

    /// Push raw text to every connected client.
    fn push_raw(&self, text: &str) {
        drop(self.shared.push_tx.send(text.to_owned()));
    }

    /// Drop every live socket without a close handshake.
    fn drop_connections(&self) {
        drop(self.shared.drop_tx.send(()));
    }

    async fn recv_request(&mut self) -> Option<Value> {
        timeout(WAIT, self.request_rx.recv()).await.ok().flatten()
    }

    async fn recv_event(&mut self) -> Option<Event> {
        timeout(WAIT, self.event_rx.recv()).await.ok().flatten()
    }
}

/// Example payloads from the Binance market stream documentation.
/// <https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams>
mod payloads {
    use serde_json::{Value, json};

    #[must_use]
    pub fn trade(symbol: &str, trade_id: u64) -> Value {
        json!({
            "stream": format!("{}@trade", symbol.to_lowercase()),
            "data": {
                "e": "trade",
                "E": 1_672_515_782_136_u64,
                "s": symbol,
                "t": trade_id,
                "p": "0.001",
                "q": "100",
                "T": 1_672_515_782_136_u64,
                "m": true,
                "M": true
            }
        })
    }

    #[must_use]
    pub fn kline(symbol: &str, interval: &str) -> Value {
        json!({
            "stream": format!("{}@kline_{interval}", symbol.to_lowercase()),
            "data": {
                "e": "kline",
                "E": 1_672_515_782_136_u64,
                "s": symbol,
                "k": {
                    "t": 1_672_515_780_000_u64,
                    "T": 1_672_515_839_999_u64,
                    "s": symbol,
                    "i": interval,
                    "f": 100,
                    "L": 200,
                    "o": "0.0010",
                    "c": "0.0020",
                    "h": "0.0025",
                    "l": "0.0015",
                    "v": "1000",
                    "n": 100,
                    "x": false,
                    "q": "1.0000",
                    "V": "500",
                    "Q": "0.500",
                    "B": "123456"
                }
            }
        })
    }
}

fn fast_reconnect() -> Config {
    Config::builder()
        .reconnect(
            ReconnectConfig::builder()
                .max_attempts(5)
                .initial_backoff(Duration::from_millis(50))
                .max_backoff(Duration::from_millis(200))
                .build(),
        )
        .build()
}

/// Register a trade handler forwarding every trade to the returned receiver.
fn trades(client: &Client) -> mpsc::UnboundedReceiver<Trade> {
    let (tx, rx) = mpsc::unbounded_channel();
    client
        .handler(Handler::trade(handler_fn(move |trade: Trade| {
            let tx = tx.clone();
            async move {
                drop(tx.send(trade));
                Ok::<(), BoxError>(())
            }
        })))
        .unwrap();
    rx
}

/// Register an exception handler forwarding every error to the returned receiver.
fn exceptions(client: &Client) -> mpsc::UnboundedReceiver<Arc<Error>> {
    let (tx, rx) = mpsc::unbounded_channel();
    client
        .handler(Handler::exception(handler_fn(move |e: Arc<Error>| {
            let tx = tx.clone();
            async move {
                drop(tx.send(e));
                Ok::<(), BoxError>(())
            }
        })))
        .unwrap();
    rx
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

async fn wait_for_state<F: Fn(&ConnectionState) -> bool>(client: &Client, predicate: F) {
    let mut state_rx = client.state_receiver();
    timeout(WAIT, state_rx.wait_for(|state| predicate(state)))
        .await
        .unwrap()
        .unwrap();
}

mod subscriptions {
    use binance_stream::stream::Shape;

    use super::*;

    #[tokio::test]
    async fn subscribe_sends_request_and_returns_reply() {
        let mut server = MockStreamServer::start().await;
        let client = Client::new(&server.ws_url(), Config::default()).unwrap();
        let _trades = trades(&client);

        client.connect();
        let replies = client.subscribe(("trade", "BTCUSDT")).await.unwrap();

        assert_eq!(replies, vec![Value::Null]);

        let request = server.recv_request().await.unwrap();
        assert_eq!(request["method"], "SUBSCRIBE");
        assert_eq!(request["params"], json!(["btcusdt@trade"]));
        assert!(request["id"].is_u64(), "request carries an id: {request}");

        assert_eq!(client.subscribed_streams(), vec!["btcusdt@trade"]);
    }

    #[tokio::test]
    async fn shape_expands_into_one_request_per_stream() {
        let mut server = MockStreamServer::start().await;
        let client = Client::new(&server.ws_url(), Config::default()).unwrap();

        client.connect();
        let replies = client
            .subscribe(("kline", ["1m", "1h"], "BNBUSDT"))
            .await
            .unwrap();
        assert_eq!(replies.len(), 2);

        let mut streams = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..2 {
            let request = server.recv_request().await.unwrap();
            streams.push(request["params"][0].as_str().unwrap().to_owned());
            ids.push(request["id"].as_u64().unwrap());
        }
        streams.sort();
        ids.dedup();

        assert_eq!(streams, vec!["bnbusdt@kline_1h", "bnbusdt@kline_1m"]);
        assert_eq!(ids.len(), 2, "every request has its own id");
    }

    #[tokio::test]
    async fn invalid_shape_sends_nothing() {
        let mut server = MockStreamServer::start().await;
        let client = Client::new(&server.ws_url(), Config::default()).unwrap();

        client.connect();
        let err = client
            .subscribe(vec![("trade", "BTCUSDT"), ("depth", "BTCUSDT")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Kind::UnsupportedSubType);

        let err = client.subscribe(("trade", "1m", "BTCUSDT")).await.unwrap_err();
        assert_eq!(err.kind(), Kind::Validation);

        assert!(
            server.recv_request().await.is_none(),
            "validation happens before any traffic"
        );
    }

    #[tokio::test]
    async fn unsubscribe_forgets_stream() {
        let mut server = MockStreamServer::start().await;
        let client = Client::new(&server.ws_url(), Config::default()).unwrap();

        client.connect();
        client
            .subscribe(("trade", ["BTCUSDT", "ETHUSDT"]))
            .await
            .unwrap();
        let _: Option<Value> = server.recv_request().await;
        let _: Option<Value> = server.recv_request().await;

        client.unsubscribe(("trade", "ETHUSDT")).await.unwrap();

        let request = server.recv_request().await.unwrap();
        assert_eq!(request["method"], "UNSUBSCRIBE");
        assert_eq!(request["params"], json!(["ethusdt@trade"]));
        assert_eq!(client.subscribed_streams(), vec!["btcusdt@trade"]);
    }

    #[tokio::test]
    async fn list_subscriptions_returns_server_view() {
        let server = MockStreamServer::start().await;
        let client = Client::new(&server.ws_url(), Config::default()).unwrap();

        client.connect();
        assert!(client.list_subscriptions().await.unwrap().is_empty());

        client
            .subscribe(vec![
                Shape::from(("trade", "BTCUSDT")),
                Shape::from(("allMarketTickers",)),
            ])
            .await
            .unwrap();

        let mut streams = client.list_subscriptions().await.unwrap();
        streams.sort();
        assert_eq!(streams, vec!["!ticker@arr", "btcusdt@trade"]);
    }

    #[tokio::test]
    async fn rejected_request_is_an_error() {
        let server = MockStreamServer::start().await;
        server.set_mode(MODE_REJECT);
        let client = Client::new(&server.ws_url(), Config::default()).unwrap();

        client.connect();
        let err = client.subscribe(("trade", "BTCUSDT")).await.unwrap_err();

        assert_eq!(err.kind(), Kind::WebSocket);
        assert!(
            matches!(
                err.downcast_ref::<WsError>(),
                Some(WsError::Rejected { code: 2, .. })
            ),
            "unexpected error: {err:?}"
        );
        assert!(
            client.subscribed_streams().is_empty(),
            "rejected streams are not remembered"
        );
    }
}

mod dispatch {
    use super::*;

    #[tokio::test]
    async fn pushes_reach_handlers_of_their_family() {
        let server = MockStreamServer::start().await;
        let client = Client::new(&server.ws_url(), Config::default()).unwrap();
        let mut trades = trades(&client);

        let (kline_tx, mut klines) = mpsc::unbounded_channel();
        client
            .handler(Handler::kline(handler_fn(move |kline: Kline| {
                let tx = kline_tx.clone();
                async move {
                    drop(tx.send(kline));
                    Ok::<(), BoxError>(())
                }
            })))
            .unwrap();

        client.connect();
        client.subscribe(("trade", "BTCUSDT")).await.unwrap();
        client.subscribe(("kline", "1m", "BNBBTC")).await.unwrap();

        server.push(&payloads::kline("BNBBTC", "1m"));
        server.push(&payloads::trade("BTCUSDT", 12345));

        let trade = next(&mut trades).await;
        assert_eq!(trade.symbol, "BTCUSDT");
        assert_eq!(trade.trade_id, 12345);

        let kline = next(&mut klines).await;
        assert_eq!(kline.symbol, "BNBBTC");
        assert_eq!(kline.interval.to_string(), "1m");
        assert!(trades.try_recv().is_err(), "kline is not a trade");
    }

    #[tokio::test]
    async fn malformed_frames_do_not_tear_down_connection() {
        let server = MockStreamServer::start().await;
        let client = Client::new(&server.ws_url(), Config::default()).unwrap();
        let mut trades = trades(&client);
        let mut exceptions = exceptions(&client);

        client.connect();
        client.subscribe(("trade", "BTCUSDT")).await.unwrap();

        server.push_raw("not json at all");
        server.push(&json!({"stream": "btcusdt@trade", "data": {"e": "trade", "s": "BTCUSDT"}}));
        server.push(&payloads::trade("BTCUSDT", 2));

        let exception = next(&mut exceptions).await;
        assert_ne!(exception.kind(), Kind::Handler, "decoding failed, not a handler");

        let trade = next(&mut trades).await;
        assert_eq!(trade.trade_id, 2);

        assert!(client.connection_state().is_open(), "still connected");
        assert_eq!(server.connections(), 1, "no reconnection happened");
    }

    #[tokio::test]
    async fn failing_handler_is_reported_as_exception() {
        let server = MockStreamServer::start().await;
        let client = Client::new(&server.ws_url(), Config::default()).unwrap();
        let mut exceptions = exceptions(&client);

        client
            .handler(Handler::trade(handler_fn(|_: Trade| async {
                Err::<(), BoxError>("rejected by application".into())
            })))
            .unwrap();

        client.connect();
        client.subscribe(("trade", "BTCUSDT")).await.unwrap();
        server.push(&payloads::trade("BTCUSDT", 1));

        let exception = next(&mut exceptions).await;
        assert_eq!(exception.kind(), Kind::Handler);
        assert!(client.connection_state().is_open(), "still connected");
    }

    #[tokio::test]
    async fn reply_with_unknown_id_is_ignored() {
        let server = MockStreamServer::start().await;
        let client = Client::new(&server.ws_url(), Config::default()).unwrap();
        let mut trades = trades(&client);
        let mut exceptions = exceptions(&client);

        client.connect();
        client.subscribe(("trade", "BTCUSDT")).await.unwrap();

        server.push(&json!({"result": null, "id": 9_999}));
        server.push(&payloads::trade("BTCUSDT", 7));

        assert_eq!(next(&mut trades).await.trade_id, 7);
        assert!(exceptions.try_recv().is_err(), "stale reply is not an error");

        client.subscribe(("trade", "ETHUSDT")).await.unwrap();
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn close_before_connect_is_disconnected() {
        let client = Client::new("ws://127.0.0.1:1/stream", Config::default()).unwrap();

        let err = client.close().await.unwrap_err();
        assert_eq!(err.kind(), Kind::Disconnected);

        let err = client.subscribe(("trade", "BTCUSDT")).await.unwrap_err();
        assert_eq!(err.kind(), Kind::Disconnected);
    }

    #[tokio::test]
    async fn second_close_is_disconnected() {
        let mut server = MockStreamServer::start().await;
        let client = Client::new(&server.ws_url(), Config::default()).unwrap();

        client.connect();
        client.subscribe(("trade", "BTCUSDT")).await.unwrap();

        client.close().await.unwrap();
        assert_eq!(server.recv_event().await, Some(Event::Close(Some(1000))));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(client.subscribed_streams().is_empty(), "close forgets streams");

        let err = client.close().await.unwrap_err();
        assert_eq!(err.kind(), Kind::Disconnected);
    }

    #[tokio::test]
    async fn close_sends_requested_code() {
        let mut server = MockStreamServer::start().await;
        let client = Client::new(&server.ws_url(), Config::default()).unwrap();

        client.connect();
        wait_for_state(&client, |state| state.is_open()).await;

        client.close_with_code(4000).await.unwrap();
        assert_eq!(server.recv_event().await, Some(Event::Close(Some(4000))));
    }

    #[tokio::test]
    async fn request_before_open_waits_for_connection() {
        let mut server = MockStreamServer::start_gated().await;
        let client = Client::new(&server.ws_url(), Config::default()).unwrap();

        client.connect();
        let subscriber = client.clone();
        let request =
            tokio::spawn(async move { subscriber.subscribe(("trade", "BTCUSDT")).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!request.is_finished(), "no socket, no reply");
        assert!(!client.connection_state().is_open(), "handshake is held");

        server.open_gate();

        let replies = timeout(WAIT, request).await.unwrap().unwrap().unwrap();
        assert_eq!(replies, vec![Value::Null]);
        assert_eq!(server.recv_request().await.unwrap()["method"], "SUBSCRIBE");
    }

    #[tokio::test]
    async fn idle_connection_sends_ping() {
        let mut server = MockStreamServer::start().await;
        let config = Config::builder()
            .timeout(Duration::from_millis(100))
            .build();
        let client = Client::new(&server.ws_url(), config).unwrap();

        client.connect();
        wait_for_state(&client, |state| state.is_open()).await;

        assert_eq!(server.recv_event().await, Some(Event::Ping));
        assert!(client.connection_state().is_open(), "ping keeps it open");
    }

    #[tokio::test]
    async fn connection_lost_fails_waiting_request() {
        let server = MockStreamServer::start().await;
        server.set_mode(MODE_SILENT);
        let client = Client::new(&server.ws_url(), fast_reconnect()).unwrap();

        client.connect();
        wait_for_state(&client, |state| state.is_open()).await;

        let subscriber = client.clone();
        let request =
            tokio::spawn(async move { subscriber.subscribe(("trade", "BTCUSDT")).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        server.drop_connections();

        let err = timeout(WAIT, request).await.unwrap().unwrap().unwrap_err();
        assert!(
            matches!(err.downcast_ref::<WsError>(), Some(WsError::ConnectionClosed)),
            "unexpected error: {err:?}"
        );
    }

    #[tokio::test]
    async fn abandoned_reconnection_fails_waiters() {
        // Reserve a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}/stream", listener.local_addr().unwrap());
        drop(listener);

        let policy = |attempt: u32| {
            if attempt == 0 {
                RetryDecision::retry_after(Duration::from_millis(200))
            } else {
                RetryDecision::abandon()
            }
        };
        let client = Client::with_retry_policy(&endpoint, Config::default(), policy).unwrap();

        client.connect();
        let err = timeout(WAIT, client.subscribe(("trade", "BTCUSDT")))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), Kind::WebSocket, "waiter released: {err:?}");

        wait_for_state(&client, |state| *state == ConnectionState::Disconnected).await;

        let err = client.subscribe(("trade", "BTCUSDT")).await.unwrap_err();
        assert_eq!(err.kind(), Kind::Disconnected);
    }

    #[tokio::test]
    async fn connect_during_close_keeps_new_connection() {
        let server = MockStreamServer::start().await;
        let client = Client::new(&server.ws_url(), fast_reconnect()).unwrap();
        client
            .handler(Handler::trade(handler_fn(|_trade: Trade| async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<(), BoxError>(())
            })))
            .unwrap();

        client.connect();
        client.subscribe(("trade", "BTCUSDT")).await.unwrap();

        // Keep the connection task busy in a handler so the close is slow.
        server.push(&payloads::trade("BTCUSDT", 1));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let closer = client.clone();
        let close = tokio::spawn(async move { closer.close().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!close.is_finished(), "handler still running");

        client.connect();
        timeout(WAIT, close).await.unwrap().unwrap().unwrap();

        wait_for_state(&client, |state| state.is_open()).await;
        assert_eq!(
            client.subscribe(("trade", "ETHUSDT")).await.unwrap(),
            vec![Value::Null]
        );

        client.close().await.unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn close_under_inbound_load_does_not_reconnect() {
        let server = MockStreamServer::start().await;
        let client = Client::new(&server.ws_url(), fast_reconnect()).unwrap();

        client.connect();
        wait_for_state(&client, |state| state.is_open()).await;

        for trade_id in 0..2000 {
            server.push(&payloads::trade("BTCUSDT", trade_id));
        }
        client.close().await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(server.connections(), 1, "a requested close is final");
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }
}

mod reconnection {
    use super::*;

    #[tokio::test]
    async fn resubscribes_and_receives_pushes_after_reconnect() {
        let mut server = MockStreamServer::start().await;
        let client = Client::new(&server.ws_url(), fast_reconnect()).unwrap();
        let mut trades = trades(&client);

        client.connect();
        client
            .subscribe(("trade", ["BTCUSDT", "ETHUSDT"]))
            .await
            .unwrap();
        let _: Option<Value> = server.recv_request().await;
        let _: Option<Value> = server.recv_request().await;

        server.push(&payloads::trade("BTCUSDT", 1));
        assert_eq!(next(&mut trades).await.trade_id, 1);

        server.drop_connections();

        let resubscribe = server.recv_request().await.unwrap();
        assert_eq!(resubscribe["method"], "SUBSCRIBE");
        assert_eq!(
            resubscribe["params"],
            json!(["btcusdt@trade", "ethusdt@trade"]),
            "every remembered stream in one request"
        );
        assert_eq!(server.connections(), 2);

        server.push(&payloads::trade("ETHUSDT", 2));
        assert_eq!(next(&mut trades).await.trade_id, 2);
    }

    #[tokio::test]
    async fn reports_reconnecting_state() {
        let server = MockStreamServer::start().await;
        let policy = |_attempt: u32| RetryDecision::retry_after(Duration::from_millis(200));
        let client =
            Client::with_retry_policy(&server.ws_url(), Config::default(), policy).unwrap();

        client.connect();
        wait_for_state(&client, |state| state.is_open()).await;

        let mut state_rx = client.state_receiver();
        server.drop_connections();

        timeout(
            WAIT,
            state_rx.wait_for(|state| matches!(state, ConnectionState::Reconnecting { .. })),
        )
        .await
        .unwrap()
        .unwrap();
        wait_for_state(&client, |state| state.is_open()).await;
    }

    #[tokio::test]
    async fn nothing_to_resubscribe_sends_nothing() {
        let mut server = MockStreamServer::start().await;
        let client = Client::new(&server.ws_url(), fast_reconnect()).unwrap();

        client.connect();
        wait_for_state(&client, |state| state.is_open()).await;

        server.drop_connections();
        timeout(WAIT, async {
            while server.connections() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert!(server.recv_request().await.is_none(), "no streams, no request");
    }

    #[tokio::test]
    async fn attempts_restart_after_each_successful_reconnect() {
        let server = MockStreamServer::start().await;
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&attempts);
        let policy = move |attempt: u32| {
            recorded.lock().unwrap().push(attempt);
            RetryDecision::retry_after(Duration::from_millis(50))
        };
        let client =
            Client::with_retry_policy(&server.ws_url(), Config::default(), policy).unwrap();

        client.connect();
        wait_for_state(&client, |state| state.is_open()).await;

        for connections in [2, 3] {
            server.drop_connections();
            timeout(WAIT, async {
                while server.connections() < connections {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .unwrap();
            wait_for_state(&client, |state| state.is_open()).await;
        }

        assert_eq!(*attempts.lock().unwrap(), vec![0, 0]);
    }
}

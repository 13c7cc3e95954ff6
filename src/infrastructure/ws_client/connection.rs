//! Auto-reconnecting WebSocket client
//!
//! `ReconnectingConnection` keeps a logical session alive on top of a
//! replaceable physical socket. Each `open()` dials a fresh socket and
//! drops any previous one; handlers live in a [`HandlerRegistry`] shared by
//! every socket of the session.
//!
//! Reconnect triggers are asymmetric:
//! - any close whose code is not 1000/1005 schedules a reconnect;
//! - a failed dial schedules a reconnect only if it was refused;
//! - every other transport error is only logged.
//!
//! A scheduled reconnect is not cancelled by `close()`/`terminate()`: a
//! pending timer fires and re-opens the session even after an explicit
//! close. At most one timer is pending at a time.
//!
//! [`settled`](ReconnectingConnection::settled) resolves once the session
//! is closed and nothing will re-open it on its own.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::handlers::{ConnectionEvent, DisconnectCause, EventKind, HandlerRegistry, Subscription};
use super::policy::{ReconnectDecision, ReconnectPolicy, ABNORMAL_CLOSURE};
use crate::support::errors::ConnectionError;

/// Tenant used in client log records when none is configured
pub const DEFAULT_LOG_TENANT: &str = "default";

/// Ready state of the current physical socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Closing,
}

/// Transport options passed through to the WebSocket handshake
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Offered `Sec-WebSocket-Protocol` values
    pub protocols: Vec<String>,
    /// Extra handshake headers
    pub headers: Vec<(String, String)>,
    /// Tenant attributed to this client's log records
    pub log_tenant: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            protocols: Vec::new(),
            headers: Vec::new(),
            log_tenant: DEFAULT_LOG_TENANT.to_string(),
        }
    }
}

enum Command {
    Send(Message),
    Close(Option<CloseFrame<'static>>),
    Terminate,
}

/// How a socket's drive loop ended
enum Outcome {
    /// Stream finished, with or without a close frame
    Ended,
    Terminated,
    /// A newer `open()` took over the session
    Replaced,
}

struct SessionState {
    ready_state: ConnectionState,
    /// Bumped by every `open()`; sockets of older generations stay silent
    generation: u64,
    commands: Option<mpsc::UnboundedSender<Command>>,
    policy: ReconnectPolicy,
    reconnect_pending: bool,
}

struct Inner {
    url: String,
    options: ClientOptions,
    handlers: HandlerRegistry,
    state: Mutex<SessionState>,
    settled: Notify,
}

/// Cloneable handle to one logical session
#[derive(Clone)]
pub struct ReconnectingConnection {
    inner: Arc<Inner>,
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

impl ReconnectingConnection {
    /// Create the session without dialing; call [`open`](Self::open) to connect.
    pub fn new(url: impl Into<String>, options: ClientOptions, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                options,
                handlers: HandlerRegistry::new(),
                state: Mutex::new(SessionState {
                    ready_state: ConnectionState::Closed,
                    generation: 0,
                    commands: None,
                    policy,
                    reconnect_pending: false,
                }),
                settled: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn ready_state(&self) -> ConnectionState {
        self.state().ready_state
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ConnectionState::Open
    }

    pub fn retry_count(&self) -> u32 {
        self.state().policy.retry_count()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.state().reconnect_pending
    }

    /// Wait until the session is closed with no reconnect scheduled: a
    /// normal close, a disabled or exhausted policy, or a dial error that
    /// is not retried. Resolves at once if that already happened since
    /// the last call.
    pub async fn settled(&self) {
        self.inner.settled.notified().await;
    }

    fn settle_if_idle(&self) {
        let idle = {
            let state = self.state();
            state.ready_state == ConnectionState::Closed && !state.reconnect_pending
        };
        if idle {
            debug!(url = %self.inner.url, "Session settled");
            self.inner.settled.notify_one();
        }
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.handlers.on(kind, handler)
    }

    pub fn off(&self, subscription: &Subscription) -> bool {
        self.inner.handlers.off(subscription)
    }

    /// Dial a fresh socket, replacing any previous one. Must be called
    /// from within a Tokio runtime.
    pub fn open(&self) {
        let generation = {
            let mut state = self.state();
            state.generation += 1;
            state.ready_state = ConnectionState::Connecting;
            // Dropping the sender ends the previous socket's drive loop
            state.commands = None;
            state.generation
        };
        debug!(url = %self.inner.url, generation, "Opening connection");

        let conn = self.clone();
        tokio::spawn(async move { conn.run(generation).await });
    }

    pub fn send(&self, message: impl Into<Message>) -> Result<(), ConnectionError> {
        self.command(Command::Send(message.into()))
    }

    pub fn ping(&self, data: Vec<u8>) -> Result<(), ConnectionError> {
        self.command(Command::Send(Message::Ping(data)))
    }

    pub fn pong(&self, data: Vec<u8>) -> Result<(), ConnectionError> {
        self.command(Command::Send(Message::Pong(data)))
    }

    fn command(&self, command: Command) -> Result<(), ConnectionError> {
        let state = self.state();
        if state.ready_state != ConnectionState::Open {
            return Err(ConnectionError::NotConnected);
        }
        state
            .commands
            .as_ref()
            .ok_or(ConnectionError::NotConnected)?
            .send(command)
            .map_err(|_| ConnectionError::NotConnected)
    }

    /// Start the closing handshake. Without a code an empty close frame is
    /// sent, which the peer reports back as 1005. No-op without a socket.
    pub fn close(&self, code: Option<u16>, reason: &str) {
        let frame = code.map(|code| CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        });
        let mut state = self.state();
        let sent = state
            .commands
            .as_ref()
            .is_some_and(|commands| commands.send(Command::Close(frame)).is_ok());
        if sent {
            state.ready_state = ConnectionState::Closing;
        }
    }

    /// Drop the socket without a closing handshake. The session observes
    /// an abnormal close (1006), which the policy treats like any other
    /// abnormal close.
    pub fn terminate(&self) {
        if let Some(commands) = &self.state().commands {
            let _ = commands.send(Command::Terminate);
        }
    }

    /// Apply the reconnect policy after a disconnect.
    pub fn reconnect(&self, cause: DisconnectCause) {
        let log_tenant = self.inner.options.log_tenant.as_str();
        let url = &self.inner.url;

        let decision = {
            let mut state = self.state();
            if state.reconnect_pending {
                debug!(log_tenant, %url, "Reconnect already scheduled");
                return;
            }
            let decision = state.policy.next_attempt();
            if let ReconnectDecision::Retry { attempt, delay } = decision {
                state.reconnect_pending = true;
                let conn = self.clone();
                let cause = cause.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    info!(
                        log_tenant = %conn.inner.options.log_tenant,
                        url = %conn.inner.url,
                        attempt,
                        timeout_ms = delay.as_millis() as u64,
                        "Re-connection try"
                    );
                    conn.state().reconnect_pending = false;
                    conn.inner.handlers.emit(&ConnectionEvent::Reconnect(cause));
                    conn.open();
                });
            }
            decision
        };

        match decision {
            ReconnectDecision::Disabled => {
                debug!(log_tenant, %url, %cause, "Auto-reconnect disabled");
                self.settle_if_idle();
            }
            ReconnectDecision::Retry { attempt, delay } => {
                metrics::counter!("ws_client_reconnect_attempts_total").increment(1);
                debug!(log_tenant, %url, attempt, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
            }
            ReconnectDecision::Exhausted { attempts } => {
                metrics::counter!("ws_client_reconnect_exhausted_total").increment(1);
                warn!(log_tenant, %url, attempts, %cause, "Re-connection maximum retries reached");
                self.inner.handlers.emit(&ConnectionEvent::Maximum(cause));
                self.settle_if_idle();
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state().generation == generation
    }

    fn build_request(&self) -> Result<Request, ConnectionError> {
        let mut request = self
            .inner
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectionError::InvalidRequest(e.to_string()))?;

        let options = &self.inner.options;
        if !options.protocols.is_empty() {
            let value = HeaderValue::from_str(&options.protocols.join(", "))
                .map_err(|e| ConnectionError::InvalidRequest(e.to_string()))?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        }
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConnectionError::InvalidRequest(e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ConnectionError::InvalidRequest(e.to_string()))?;
            request.headers_mut().insert(name, value);
        }
        Ok(request)
    }

    async fn run(self, generation: u64) {
        let connected = match self.build_request() {
            Ok(request) => tokio_tungstenite::connect_async(request)
                .await
                .map(|(socket, _response)| socket)
                .map_err(classify),
            Err(e) => Err(e),
        };

        match connected {
            Ok(socket) => self.drive(generation, socket).await,
            Err(e) => self.dial_failed(generation, e),
        }
    }

    fn dial_failed(&self, generation: u64, err: ConnectionError) {
        {
            let mut state = self.state();
            if state.generation != generation {
                return;
            }
            state.ready_state = ConnectionState::Closed;
        }

        let log_tenant = self.inner.options.log_tenant.as_str();
        let url = &self.inner.url;
        error!(log_tenant, %url, error = %err, "Connection error");
        self.inner.handlers.emit(&ConnectionEvent::Error(err.clone()));

        if err.is_connection_refused() {
            self.reconnect(DisconnectCause::Refused(err));
        } else {
            self.settle_if_idle();
        }
    }

    async fn drive(&self, generation: u64, socket: Socket) {
        let (tx, mut commands) = mpsc::unbounded_channel();
        {
            let mut state = self.state();
            if state.generation != generation {
                return;
            }
            state.commands = Some(tx);
            state.ready_state = ConnectionState::Open;
            state.policy.on_open();
        }
        info!(log_tenant = %self.inner.options.log_tenant, url = %self.inner.url, "Connection opened");
        self.inner.handlers.emit(&ConnectionEvent::Open);

        let (mut sink, mut stream) = socket.split();
        let mut close_frame: Option<(u16, String)> = None;

        let outcome = loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Send(message)) => {
                        if let Err(e) = sink.send(message).await {
                            self.transport_error(generation, e);
                            break Outcome::Ended;
                        }
                    }
                    Some(Command::Close(frame)) => {
                        // Keep reading: the peer's echo completes the handshake
                        if let Err(e) = sink.send(Message::Close(frame)).await {
                            self.transport_error(generation, e);
                            break Outcome::Ended;
                        }
                    }
                    Some(Command::Terminate) => break Outcome::Terminated,
                    None => break Outcome::Replaced,
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Close(frame))) => {
                        close_frame = Some(match frame {
                            Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                            None => (u16::from(CloseCode::Status), String::new()),
                        });
                    }
                    Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                        if self.is_current(generation) {
                            self.inner.handlers.emit(&ConnectionEvent::Message(message));
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(tungstenite::Error::ConnectionClosed)) | None => break Outcome::Ended,
                    Some(Err(e)) => {
                        self.transport_error(generation, e);
                        break Outcome::Ended;
                    }
                },
            }
        };

        let (code, reason) = match outcome {
            Outcome::Replaced => {
                debug!(url = %self.inner.url, generation, "Socket replaced by a newer open");
                return;
            }
            Outcome::Terminated => (ABNORMAL_CLOSURE, String::new()),
            Outcome::Ended => close_frame.unwrap_or((ABNORMAL_CLOSURE, String::new())),
        };
        self.closed(generation, code, reason);
    }

    fn transport_error(&self, generation: u64, err: tungstenite::Error) {
        if !self.is_current(generation) {
            return;
        }
        let err = classify(err);
        error!(log_tenant = %self.inner.options.log_tenant, url = %self.inner.url, error = %err, "Connection error");
        self.inner.handlers.emit(&ConnectionEvent::Error(err));
    }

    fn closed(&self, generation: u64, code: u16, reason: String) {
        let reconnect = {
            let mut state = self.state();
            if state.generation != generation {
                return;
            }
            state.commands = None;
            state.ready_state = ConnectionState::Closed;
            state.policy.on_close(code)
        };

        self.inner.handlers.emit(&ConnectionEvent::Close {
            code,
            reason: reason.clone(),
        });

        let log_tenant = self.inner.options.log_tenant.as_str();
        let url = &self.inner.url;
        if reconnect {
            error!(log_tenant, %url, code, %reason, "Connection closing error");
            self.reconnect(DisconnectCause::Closed { code, reason });
        } else {
            info!(log_tenant, %url, code, "Connection closed");
            self.settle_if_idle();
        }
    }
}

fn classify(err: tungstenite::Error) -> ConnectionError {
    match &err {
        tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            ConnectionError::ConnectionRefused(io.to_string())
        }
        _ => ConnectionError::Transport(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::UnboundedReceiver;

    type ServerSocket = WebSocketStream<TcpStream>;

    /// In-process WebSocket server; `handler` gets the connection index.
    async fn spawn_server<F, Fut>(handler: F) -> String
    where
        F: Fn(usize, ServerSocket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            let mut index = 0;
            while let Ok((stream, _)) = listener.accept().await {
                let handler = handler.clone();
                let current = index;
                index += 1;
                tokio::spawn(async move {
                    if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                        handler(current, ws).await;
                    }
                });
            }
        });
        format!("ws://{addr}")
    }

    async fn hold_open(mut ws: ServerSocket) {
        while let Some(Ok(_)) = ws.next().await {}
    }

    fn record_events(conn: &ReconnectingConnection) -> UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in [
            EventKind::Open,
            EventKind::Error,
            EventKind::Close,
            EventKind::Message,
            EventKind::Reconnect,
            EventKind::Maximum,
        ] {
            let tx = tx.clone();
            conn.on(kind, move |event| {
                let _ = tx.send(event.clone());
            });
        }
        rx
    }

    async fn next_of(rx: &mut UnboundedReceiver<ConnectionEvent>, kind: EventKind) -> ConnectionEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.expect("event channel closed");
                if event.kind() == kind {
                    return event;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no {kind:?} event"))
    }

    /// Collect everything emitted during `window`.
    async fn drain_for(rx: &mut UnboundedReceiver<ConnectionEvent>, window: Duration) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            kinds.push(event.kind());
        }
        kinds
    }

    fn policy(timeout_ms: u64, max_retries: i32) -> ReconnectPolicy {
        ReconnectPolicy::new(Duration::from_millis(timeout_ms), max_retries)
    }

    async fn assert_settles(conn: &ReconnectingConnection) {
        tokio::time::timeout(Duration::from_secs(5), conn.settled())
            .await
            .expect("session never settled");
        assert_eq!(conn.ready_state(), ConnectionState::Closed);
        assert!(!conn.reconnect_pending());
    }

    /// A local port with nothing listening on it
    async fn free_addr() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    #[test]
    fn send_without_socket_is_not_connected() {
        let conn = ReconnectingConnection::new("ws://127.0.0.1:1", ClientOptions::default(), policy(10, 1));
        assert_eq!(conn.ready_state(), ConnectionState::Closed);
        assert_eq!(conn.send("hello"), Err(ConnectionError::NotConnected));
        assert_eq!(conn.ping(vec![1]), Err(ConnectionError::NotConnected));
        assert_eq!(conn.pong(vec![1]), Err(ConnectionError::NotConnected));
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn open_dispatches_messages_and_send_reaches_peer() {
        let (echo_tx, mut echo_rx) = mpsc::unbounded_channel::<String>();
        let url = spawn_server(move |_, mut ws| {
            let echo_tx = echo_tx.clone();
            async move {
                ws.send(Message::Text("hello".into())).await.unwrap();
                while let Some(Ok(message)) = ws.next().await {
                    if let Message::Text(text) = message {
                        let _ = echo_tx.send(text);
                    }
                }
            }
        })
        .await;

        let conn = ReconnectingConnection::new(url, ClientOptions::default(), policy(50, 1));
        let mut events = record_events(&conn);
        conn.open();

        next_of(&mut events, EventKind::Open).await;
        assert!(conn.is_open());
        assert_eq!(conn.retry_count(), 0);
        assert_eq!(
            next_of(&mut events, EventKind::Message).await,
            ConnectionEvent::Message(Message::Text("hello".into()))
        );

        conn.send("from client").unwrap();
        let received = tokio::time::timeout(Duration::from_secs(5), echo_rx.recv()).await.unwrap();
        assert_eq!(received.as_deref(), Some("from client"));
    }

    #[tokio::test]
    async fn abnormal_close_reconnects_with_same_handlers() {
        let url = spawn_server(|index, ws| async move {
            if index == 0 {
                // Drop the TCP stream without a close frame
                drop(ws);
            } else {
                hold_open(ws).await;
            }
        })
        .await;

        let conn = ReconnectingConnection::new(url, ClientOptions::default(), policy(50, 3));
        let mut events = record_events(&conn);
        conn.open();

        next_of(&mut events, EventKind::Open).await;
        let close = next_of(&mut events, EventKind::Close).await;
        assert_eq!(close, ConnectionEvent::Close { code: ABNORMAL_CLOSURE, reason: String::new() });
        assert!(matches!(
            next_of(&mut events, EventKind::Reconnect).await,
            ConnectionEvent::Reconnect(DisconnectCause::Closed { code: ABNORMAL_CLOSURE, .. })
        ));
        // Handlers registered once still see the second socket
        next_of(&mut events, EventKind::Open).await;
        assert!(conn.is_open());
        assert_eq!(conn.retry_count(), 0);
    }

    #[tokio::test]
    async fn normal_close_resets_and_does_not_reconnect() {
        let url = spawn_server(|_, mut ws| async move {
            let _ = ws
                .close(Some(CloseFrame { code: CloseCode::Normal, reason: "bye".into() }))
                .await;
            hold_open(ws).await;
        })
        .await;

        let conn = ReconnectingConnection::new(url, ClientOptions::default(), policy(20, 3));
        let mut events = record_events(&conn);
        conn.open();

        assert_eq!(
            next_of(&mut events, EventKind::Close).await,
            ConnectionEvent::Close { code: 1000, reason: "bye".into() }
        );
        let later = drain_for(&mut events, Duration::from_millis(200)).await;
        assert!(!later.contains(&EventKind::Reconnect), "unexpected events: {later:?}");
        assert!(!later.contains(&EventKind::Open));
        assert_eq!(conn.ready_state(), ConnectionState::Closed);
        assert_eq!(conn.retry_count(), 0);
        assert_settles(&conn).await;
    }

    #[tokio::test]
    async fn caller_close_completes_handshake() {
        let url = spawn_server(|_, ws| hold_open(ws)).await;
        let conn = ReconnectingConnection::new(url, ClientOptions::default(), policy(20, 3));
        let mut events = record_events(&conn);
        conn.open();
        next_of(&mut events, EventKind::Open).await;

        conn.close(Some(1000), "done");
        assert_eq!(conn.ready_state(), ConnectionState::Closing);
        assert!(matches!(
            next_of(&mut events, EventKind::Close).await,
            ConnectionEvent::Close { code: 1000, .. }
        ));
        let later = drain_for(&mut events, Duration::from_millis(150)).await;
        assert!(!later.contains(&EventKind::Reconnect));
        assert_eq!(conn.send("late"), Err(ConnectionError::NotConnected));
    }

    #[tokio::test]
    async fn refused_dials_retry_until_maximum() {
        // Reserve a port, then free it so nothing listens there
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let conn = ReconnectingConnection::new(format!("ws://{addr}"), ClientOptions::default(), policy(20, 2));
        let mut events = record_events(&conn);
        conn.open();

        next_of(&mut events, EventKind::Maximum).await;
        let later = drain_for(&mut events, Duration::from_millis(150)).await;
        assert!(later.is_empty(), "timer scheduled after maximum: {later:?}");
        assert_eq!(conn.retry_count(), 2);
        assert_settles(&conn).await;
    }

    #[tokio::test]
    async fn refused_sequence_is_error_then_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let conn = ReconnectingConnection::new(format!("ws://{addr}"), ClientOptions::default(), policy(20, 2));
        let mut events = record_events(&conn);
        conn.open();

        let mut kinds = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            if let ConnectionEvent::Error(err) = &event {
                assert!(err.is_connection_refused(), "unexpected error {err}");
            }
            let kind = event.kind();
            kinds.push(kind);
            if kind == EventKind::Maximum {
                break;
            }
        }
        assert_eq!(
            kinds,
            vec![
                EventKind::Error,
                EventKind::Reconnect,
                EventKind::Error,
                EventKind::Reconnect,
                EventKind::Error,
                EventKind::Maximum,
            ]
        );
    }

    #[tokio::test]
    async fn other_dial_errors_only_log() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream
                    .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
                    .await;
            }
        });

        let conn = ReconnectingConnection::new(format!("ws://{addr}"), ClientOptions::default(), policy(20, 5));
        let mut events = record_events(&conn);
        conn.open();

        match next_of(&mut events, EventKind::Error).await {
            ConnectionEvent::Error(err) => assert!(!err.is_connection_refused()),
            other => panic!("unexpected {other:?}"),
        }
        let later = drain_for(&mut events, Duration::from_millis(200)).await;
        assert!(later.is_empty(), "unexpected events: {later:?}");
        assert_eq!(conn.retry_count(), 0);
        assert_settles(&conn).await;
    }

    #[tokio::test]
    async fn disabled_policy_never_reconnects() {
        let url = spawn_server(|_, ws| async move { drop(ws) }).await;
        let conn = ReconnectingConnection::new(url, ClientOptions::default(), ReconnectPolicy::disabled());
        let mut events = record_events(&conn);
        conn.open();

        next_of(&mut events, EventKind::Close).await;
        let later = drain_for(&mut events, Duration::from_millis(150)).await;
        assert!(!later.contains(&EventKind::Reconnect));
        assert!(!later.contains(&EventKind::Maximum));
        assert_settles(&conn).await;
    }

    #[tokio::test]
    async fn scheduled_reconnect_keeps_session_unsettled() {
        let url = spawn_server(|_, ws| async move { drop(ws) }).await;
        let conn = ReconnectingConnection::new(url, ClientOptions::default(), policy(300, -1));
        let mut events = record_events(&conn);
        conn.open();

        next_of(&mut events, EventKind::Close).await;
        assert!(conn.reconnect_pending());
        let waited = tokio::time::timeout(Duration::from_millis(150), conn.settled()).await;
        assert!(waited.is_err(), "settled while a reconnect was scheduled");
    }

    #[tokio::test]
    async fn secure_url_is_dialed() {
        let addr = free_addr().await;
        let conn = ReconnectingConnection::new(format!("wss://{addr}"), ClientOptions::default(), ReconnectPolicy::disabled());
        let mut events = record_events(&conn);
        conn.open();

        // Reaching the TCP dial proves the scheme is supported
        match next_of(&mut events, EventKind::Error).await {
            ConnectionEvent::Error(err) => assert!(err.is_connection_refused(), "unexpected error {err}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn secure_url_attempts_tls_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let _ = seen_tx.send(());
                drop(stream);
            }
        });

        let conn = ReconnectingConnection::new(format!("wss://{addr}"), ClientOptions::default(), ReconnectPolicy::disabled());
        let mut events = record_events(&conn);
        conn.open();

        tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match next_of(&mut events, EventKind::Error).await {
            ConnectionEvent::Error(err) => {
                assert!(!err.is_connection_refused());
                assert!(!err.to_string().contains("not compiled"), "unexpected error {err}");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_settles(&conn).await;
    }

    #[tokio::test]
    async fn pending_reconnect_survives_explicit_close() {
        let url = spawn_server(|index, ws| async move {
            if index == 0 {
                drop(ws);
            } else {
                hold_open(ws).await;
            }
        })
        .await;

        let conn = ReconnectingConnection::new(url, ClientOptions::default(), policy(150, 3));
        let mut events = record_events(&conn);
        conn.open();
        next_of(&mut events, EventKind::Close).await;

        // Timer already armed; closing now does not cancel it
        conn.close(Some(1000), "shutting down");
        conn.terminate();
        next_of(&mut events, EventKind::Reconnect).await;
        next_of(&mut events, EventKind::Open).await;
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn handshake_carries_protocols_and_headers() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<(Option<String>, Option<String>)>();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let accepted = tokio_tungstenite::accept_hdr_async(
                stream,
                |req: &tungstenite::handshake::server::Request,
                 mut resp: tungstenite::handshake::server::Response| {
                    let header = |name: &str| {
                        req.headers()
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .map(String::from)
                    };
                    let _ = seen_tx.send((header("Sec-WebSocket-Protocol"), header("X-Tenant")));
                    resp.headers_mut()
                        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("ocpp1.6"));
                    Ok(resp)
                },
            )
            .await;
            if let Ok(ws) = accepted {
                hold_open(ws).await;
            }
        });

        let options = ClientOptions {
            protocols: vec!["ocpp1.6".into()],
            headers: vec![("X-Tenant".into(), "tenantA".into())],
            log_tenant: "tenantA".into(),
        };
        let conn = ReconnectingConnection::new(format!("ws://{addr}"), options, policy(20, 0));
        let mut events = record_events(&conn);
        conn.open();

        next_of(&mut events, EventKind::Open).await;
        let (protocols, tenant) = seen_rx.recv().await.unwrap();
        assert_eq!(protocols.as_deref(), Some("ocpp1.6"));
        assert_eq!(tenant.as_deref(), Some("tenantA"));
    }
}

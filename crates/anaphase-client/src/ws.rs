//! Streaming transport over a shared WebSocket connection.
//!
//! Speaks the `graphql-ws` sub-protocol (subscriptions-transport-ws message
//! set). One background task owns the socket and multiplexes every
//! subscription by id. The task is spawned on first use, connects lazily,
//! reconnects with exponential back-off and re-sends `start` for every
//! active subscription after a reconnect.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{GraphqlError, NetworkError};
use crate::operation::{GraphqlResponse, Operation};
use crate::transport::{ResultStream, Transport, TransportKind};

/// WebSocket sub-protocol negotiated with the server.
pub const SUBPROTOCOL: &str = "graphql-ws";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Sink = mpsc::UnboundedSender<Result<GraphqlResponse, NetworkError>>;

/// Streaming transport settings.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Bound on each connection attempt, handshake and ack included.
    pub connect_timeout: Duration,
    /// Reconnect after the connection drops.
    pub reconnect: bool,
    /// First delay between reconnect attempts.
    pub initial_backoff: Duration,
    /// Upper bound for the reconnect delay.
    pub max_backoff: Duration,
    /// Payload sent with `connection_init`.
    pub connection_params: Option<Value>,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            reconnect: true,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            connection_params: None,
        }
    }
}

impl WsConfig {
    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable or disable reconnects.
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the back-off bounds.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Set the `connection_init` payload.
    pub fn with_connection_params(mut self, params: Value) -> Self {
        self.connection_params = Some(params);
        self
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_backoff)
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage<'a> {
    ConnectionInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<&'a Value>,
    },
    Start {
        id: &'a str,
        payload: &'a Value,
    },
    Stop {
        id: &'a str,
    },
    ConnectionTerminate,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    ConnectionAck,
    ConnectionError {
        #[serde(default)]
        payload: Value,
    },
    #[serde(rename = "ka")]
    KeepAlive,
    Data {
        id: String,
        payload: GraphqlResponse,
    },
    Error {
        id: String,
        #[serde(default)]
        payload: Value,
    },
    Complete {
        id: String,
    },
}

enum Command {
    Start {
        id: String,
        payload: Value,
        sink: Sink,
    },
    Stop {
        id: String,
    },
}

struct Active {
    payload: Value,
    sink: Sink,
}

struct Shared {
    url: Url,
    config: WsConfig,
    next_id: AtomicU64,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

impl Shared {
    /// Command channel of the connection task, spawning it on first use.
    fn commands(&self) -> Result<mpsc::UnboundedSender<Command>, NetworkError> {
        let mut commands = self.commands.lock();
        if let Some(tx) = commands.as_ref() {
            return Ok(tx.clone());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| NetworkError::Protocol(err.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(run_connection(self.url.clone(), self.config.clone(), rx));
        *commands = Some(tx.clone());
        Ok(tx)
    }
}

/// Sends subscriptions over one shared WebSocket connection.
#[derive(Clone)]
pub struct WsTransport {
    shared: Arc<Shared>,
}

impl WsTransport {
    /// Create a transport for a `ws://` or `wss://` endpoint.
    pub fn new(url: Url, config: WsConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                url,
                config,
                next_id: AtomicU64::new(1),
                commands: Mutex::new(None),
            }),
        }
    }

    /// Endpoint the transport connects to.
    pub fn url(&self) -> &Url {
        &self.shared.url
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("url", &self.shared.url.as_str())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl Transport for WsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Streaming
    }

    fn request(&self, operation: Operation) -> ResultStream {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        Box::pin(SubscriptionStream {
            id,
            shared: self.shared.clone(),
            payload: Some(operation.payload()),
            receiver: None,
            finished: false,
        })
    }
}

/// Events for one subscription. Sends `start` when first polled and `stop` when dropped.
struct SubscriptionStream {
    id: String,
    shared: Arc<Shared>,
    payload: Option<Value>,
    receiver: Option<mpsc::UnboundedReceiver<Result<GraphqlResponse, NetworkError>>>,
    finished: bool,
}

impl Stream for SubscriptionStream {
    type Item = Result<GraphqlResponse, NetworkError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        if let Some(payload) = this.payload.take() {
            let (sink, receiver) = mpsc::unbounded_channel();
            let started = this.shared.commands().and_then(|commands| {
                commands
                    .send(Command::Start {
                        id: this.id.clone(),
                        payload,
                        sink,
                    })
                    .map_err(|_| NetworkError::Closed)
            });
            if let Err(err) = started {
                this.finished = true;
                return Poll::Ready(Some(Err(err)));
            }
            this.receiver = Some(receiver);
        }

        let Some(receiver) = this.receiver.as_mut() else {
            return Poll::Ready(None);
        };
        match receiver.poll_recv(cx) {
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        if self.receiver.is_none() || self.finished {
            return;
        }
        if let Some(commands) = self.shared.commands.lock().as_ref() {
            let _ = commands.send(Command::Stop {
                id: self.id.clone(),
            });
        }
    }
}

enum SessionEnd {
    Shutdown,
    Dropped(NetworkError),
}

async fn run_connection(
    url: Url,
    config: WsConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut active: HashMap<String, Active> = HashMap::new();
    let mut backoff = config.initial_backoff;

    loop {
        if active.is_empty() {
            match commands.recv().await {
                Some(command) => {
                    apply_offline(command, &mut active);
                    continue;
                }
                None => return,
            }
        }

        let error = match connect(&url, &config).await {
            Ok(socket) => {
                tracing::debug!(url = %url, "websocket connected");
                backoff = config.initial_backoff;
                match session(socket, &mut active, &mut commands).await {
                    SessionEnd::Shutdown => return,
                    SessionEnd::Dropped(error) => error,
                }
            }
            Err(error) => error,
        };

        if !config.reconnect {
            tracing::warn!(url = %url, error = %error, "websocket closed");
            for (_, subscription) in active.drain() {
                let _ = subscription.sink.send(Err(error.clone()));
            }
            continue;
        }
        if active.is_empty() {
            continue;
        }

        tracing::warn!(
            url = %url,
            error = %error,
            retry_in_ms = backoff.as_millis() as u64,
            "websocket dropped, reconnecting"
        );
        let delay = tokio::time::sleep(backoff);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => break,
                command = commands.recv() => match command {
                    Some(command) => apply_offline(command, &mut active),
                    None => return,
                },
            }
        }
        backoff = config.next_backoff(backoff);
    }
}

fn apply_offline(command: Command, active: &mut HashMap<String, Active>) {
    match command {
        Command::Start { id, payload, sink } => {
            active.insert(id, Active { payload, sink });
        }
        Command::Stop { id } => {
            active.remove(&id);
        }
    }
}

async fn connect(url: &Url, config: &WsConfig) -> Result<Socket, NetworkError> {
    let mut request = url.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

    tokio::time::timeout(config.connect_timeout, handshake(request, config))
        .await
        .map_err(|_| NetworkError::Timeout)?
}

async fn handshake<R: IntoClientRequest + Unpin>(
    request: R,
    config: &WsConfig,
) -> Result<Socket, NetworkError> {
    let (mut socket, _) = tokio_tungstenite::connect_async(request).await?;
    send(
        &mut socket,
        &ClientMessage::ConnectionInit {
            payload: config.connection_params.as_ref(),
        },
    )
    .await?;

    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str(text.as_str()) {
                Ok(ServerMessage::ConnectionAck) => return Ok(socket),
                Ok(ServerMessage::ConnectionError { payload }) => {
                    return Err(NetworkError::Protocol(format!(
                        "connection rejected: {payload}"
                    )))
                }
                _ => continue,
            },
            Some(Ok(Message::Close(_))) | None => return Err(NetworkError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(err.into()),
        }
    }
}

async fn send(socket: &mut Socket, message: &ClientMessage<'_>) -> Result<(), NetworkError> {
    let text = serde_json::to_string(message).map_err(|err| NetworkError::Protocol(err.to_string()))?;
    socket.send(Message::text(text)).await?;
    Ok(())
}

async fn session(
    mut socket: Socket,
    active: &mut HashMap<String, Active>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> SessionEnd {
    for (id, subscription) in active.iter() {
        let start = ClientMessage::Start {
            id,
            payload: &subscription.payload,
        };
        if let Err(error) = send(&mut socket, &start).await {
            return SessionEnd::Dropped(error);
        }
    }

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Start { id, payload, sink }) => {
                    let sent = send(&mut socket, &ClientMessage::Start { id: &id, payload: &payload }).await;
                    active.insert(id, Active { payload, sink });
                    if let Err(error) = sent {
                        return SessionEnd::Dropped(error);
                    }
                }
                Some(Command::Stop { id }) => {
                    if active.remove(&id).is_some() {
                        if let Err(error) = send(&mut socket, &ClientMessage::Stop { id: &id }).await {
                            return SessionEnd::Dropped(error);
                        }
                    }
                }
                None => {
                    let _ = send(&mut socket, &ClientMessage::ConnectionTerminate).await;
                    let _ = socket.close(None).await;
                    return SessionEnd::Shutdown;
                }
            },
            message = socket.next() => match message {
                Some(Ok(Message::Text(text))) => handle_text(text.as_str(), active),
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Dropped(NetworkError::Closed),
                Some(Ok(_)) => {}
                Some(Err(err)) => return SessionEnd::Dropped(err.into()),
            },
        }
    }
}

fn handle_text(text: &str, active: &mut HashMap<String, Active>) {
    let message = match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring malformed websocket message");
            return;
        }
    };

    match message {
        ServerMessage::Data { id, payload } => {
            if let Some(subscription) = active.get(&id) {
                let _ = subscription.sink.send(Ok(payload));
            }
        }
        ServerMessage::Error { id, payload } => {
            if let Some(subscription) = active.remove(&id) {
                let response = GraphqlResponse {
                    errors: errors_from_payload(payload),
                    ..Default::default()
                };
                let _ = subscription.sink.send(Ok(response));
            }
        }
        ServerMessage::Complete { id } => {
            active.remove(&id);
        }
        ServerMessage::ConnectionError { payload } => {
            tracing::warn!(payload = %payload, "websocket connection error");
        }
        ServerMessage::ConnectionAck | ServerMessage::KeepAlive => {}
    }
}

fn errors_from_payload(payload: Value) -> Vec<GraphqlError> {
    match payload {
        Value::Array(_) => serde_json::from_value(payload.clone())
            .unwrap_or_else(|_| vec![GraphqlError::new(payload.to_string())]),
        Value::Object(_) => serde_json::from_value(payload.clone())
            .map(|error| vec![error])
            .unwrap_or_else(|_| vec![GraphqlError::new(payload.to_string())]),
        Value::String(message) => vec![GraphqlError::new(message)],
        other => vec![GraphqlError::new(other.to_string())],
    }
}

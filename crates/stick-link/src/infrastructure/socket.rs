//! WebREPL socket transport: the device's REPL over a WebSocket.
//!
//! # Connection sequence
//!
//! ```text
//! connect_async(ws://host:8266)     bounded by connect_timeout
//!        │
//!        ▼
//! password exchange (AuthExchange)  bounded by auth_timeout
//!        │
//!        ▼
//! reader task: text/binary frames ──▶ TransportEvent::Data
//! ```
//!
//! Any failure before the reader starts closes the socket before the error
//! is returned, so a failed `connect()` never leaves a half-open link.
//!
//! # Split sink and stream (for beginners)
//!
//! `WebSocketStream::split()` gives a write half (`SplitSink`) and a read half
//! (`SplitStream`).  The read half moves into the reader task.  The write half
//! stays behind a `tokio::sync::Mutex` because sending a frame is an `.await`
//! and a `std::sync::Mutex` guard must not be held across one.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stick_core::protocol::{AuthExchange, AuthStep};

use crate::application::transport::{
    Link, Transport, TransportError, TransportEvent, TransportKind,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// WebREPL connection settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    #[serde(with = "crate::application::millis")]
    pub connect_timeout: Duration,
    #[serde(with = "crate::application::millis")]
    pub auth_timeout: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            host: "192.168.4.1".to_string(),
            port: 8266,
            password: String::new(),
            connect_timeout: Duration::from_secs(5),
            auth_timeout: Duration::from_secs(5),
        }
    }
}

impl fmt::Debug for SocketConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connect_timeout", &self.connect_timeout)
            .field("auth_timeout", &self.auth_timeout)
            .finish_non_exhaustive()
    }
}

impl SocketConfig {
    /// Settings for `host` with everything else at its default.
    pub fn for_host(host: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// `ws://host:port`
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

// ── Shared connection state ───────────────────────────────────────────────────

struct SocketShared {
    link: Link,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl SocketShared {
    /// Closes the socket and publishes `Disconnected`.  Only the first caller
    /// per connection does anything.
    async fn teardown(&self) {
        if !self.link.begin_teardown() {
            return;
        }
        let token = lock(&self.cancel).take();
        if let Some(token) = token {
            token.cancel();
        }
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                debug!("closing websocket: {e}");
            }
        }
        self.link.finish_teardown();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// [`Transport`] over the device's WebREPL WebSocket.
pub struct SocketTransport {
    config: SocketConfig,
    shared: Arc<SocketShared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SocketTransport {
    pub fn new(config: SocketConfig) -> Self {
        Self {
            config,
            shared: Arc::new(SocketShared {
                link: Link::new(TransportKind::WifiSocket),
                sink: tokio::sync::Mutex::new(None),
                cancel: Mutex::new(None),
            }),
            reader: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    async fn open(&self) -> Result<(WsSink, WsSource), TransportError> {
        let url = self.config.url();
        debug!(%url, "opening websocket");

        let (ws, _response) = match timeout(self.config.connect_timeout, connect_async(url.as_str())).await {
            Err(_) => return Err(TransportError::ConnectTimeout { url }),
            Ok(Err(e)) => {
                return Err(TransportError::ConnectFailed {
                    url,
                    reason: e.to_string(),
                })
            }
            Ok(Ok(pair)) => pair,
        };

        let (mut sink, mut source) = ws.split();
        let auth = timeout(
            self.config.auth_timeout,
            authenticate(&mut sink, &mut source, &self.config.password),
        )
        .await
        .unwrap_or(Err(TransportError::AuthTimeout));

        if let Err(e) = auth {
            if let Err(close_err) = sink.close().await {
                debug!("closing websocket after failed auth: {close_err}");
            }
            return Err(e);
        }
        Ok((sink, source))
    }

    async fn send_frame(&self, frame: Message) -> Result<(), TransportError> {
        if !self.shared.link.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let result = {
            let mut guard = self.shared.sink.lock().await;
            let Some(sink) = guard.as_mut() else {
                return Err(TransportError::NotConnected);
            };
            sink.send(frame).await
        };
        if let Err(e) = result {
            warn!("websocket write failed: {e}");
            self.shared.teardown().await;
            return Err(TransportError::WriteFailed(e.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WifiSocket
    }

    fn is_connected(&self) -> bool {
        self.shared.link.is_connected()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.shared.link.begin_connect()?;

        let (sink, source) = match self.open().await {
            Ok(halves) => halves,
            Err(e) => {
                warn!(code = e.code(), host = %self.config.host, "websocket connect failed: {e}");
                self.shared.link.abort_connect();
                return Err(e);
            }
        };

        let token = CancellationToken::new();
        *self.shared.sink.lock().await = Some(sink);
        *lock(&self.shared.cancel) = Some(token.clone());
        self.shared.link.established();
        info!(url = %self.config.url(), "WebREPL session authenticated");

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(read_loop(source, shared, token));
        *lock(&self.reader) = Some(handle);
        Ok(())
    }

    async fn disconnect(&self) {
        self.shared.teardown().await;
        let handle = lock(&self.reader).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("websocket reader ended abnormally: {e}");
            }
        }
    }

    async fn write(&self, text: &str) -> Result<(), TransportError> {
        self.send_frame(Message::Text(text.to_string())).await
    }

    async fn write_bytes(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let frame = match std::str::from_utf8(bytes) {
            Ok(text) => Message::Text(text.to_string()),
            Err(_) => Message::Binary(bytes.to_vec()),
        };
        self.send_frame(frame).await
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.link.hub().subscribe()
    }
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

/// Runs the password exchange until a verdict or the socket closes.
async fn authenticate(
    sink: &mut WsSink,
    source: &mut WsSource,
    password: &str,
) -> Result<(), TransportError> {
    let mut exchange = AuthExchange::new(password);

    while let Some(frame) = source.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Message::Close(_)) => return Err(TransportError::ConnectionClosed),
            Ok(_) => continue,
            Err(e) => {
                debug!("websocket error during auth: {e}");
                return Err(TransportError::ConnectionClosed);
            }
        };

        match exchange.feed(&text) {
            AuthStep::Pending => {}
            AuthStep::SendCredential(line) => {
                debug!("password prompt received, sending credential");
                sink.send(Message::Text(line))
                    .await
                    .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
            }
            AuthStep::Authenticated => return Ok(()),
            AuthStep::Denied => return Err(TransportError::AuthFailed),
        }
    }
    Err(TransportError::ConnectionClosed)
}

async fn read_loop(mut source: WsSource, shared: Arc<SocketShared>, token: CancellationToken) {
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => return,
            frame = source.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                if !text.is_empty() {
                    shared.link.hub().publish(TransportEvent::Data(text));
                }
            }
            Some(Ok(Message::Binary(bytes))) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                shared.link.hub().publish(TransportEvent::Data(text));
            }
            Some(Ok(Message::Close(_))) | None => {
                info!("device closed the WebREPL session");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("websocket read failed: {e}");
                shared
                    .link
                    .hub()
                    .publish(TransportEvent::Error(format!("websocket read failed: {e}")));
                break;
            }
        }
    }
    if !token.is_cancelled() {
        shared.teardown().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! The Transport contract: a media-agnostic bidirectional text channel to the
//! device.
//!
//! # Lifecycle
//!
//! ```text
//!        connect()            link up              disconnect() / link lost
//!  Idle ──────────▶ Connecting ──────▶ Connected ──────────────────────▶ Closing ──▶ Idle
//!                       │
//!                       └── failure ──▶ Idle   (nothing left half-open)
//! ```
//!
//! [`Link`] holds that state machine plus the [`EventHub`] every transport
//! publishes to.  Both concrete transports embed a `Link`, so the rules
//! "`connect` while not idle fails" and "exactly one `Disconnected` per
//! connection" live in one place.
//!
//! # Events (for beginners)
//!
//! Received text, connects, disconnects and errors are broadcast on a
//! `tokio::sync::broadcast` channel.  Any number of listeners can subscribe:
//! a live terminal view and the REPL engine's output capture each get their
//! own copy of every event, and neither has to know about the other.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Capacity of each transport's event channel.
///
/// A subscriber that falls further behind than this loses the oldest events
/// and sees `RecvError::Lagged`.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Physical medium of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    UsbSerial,
    WifiSocket,
}

impl TransportKind {
    /// Stable identifier: `usb-serial` or `wifi-socket`.
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::UsbSerial => "usb-serial",
            TransportKind::WifiSocket => "wifi-socket",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened on a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Text received from the device.
    Data(String),
    Connected,
    Disconnected,
    /// A non-fatal problem worth showing, e.g. a read error before teardown.
    Error(String),
}

/// Typed transport failures, each with a stable code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("not connected to a device")]
    NotConnected,

    #[error("no device was selected")]
    NoDeviceSelected,

    #[error("serial port {port} is already in use")]
    PortAlreadyInUse { port: String },

    #[error("failed to open serial port {port}: {reason}")]
    PortOpenFailed { port: String, reason: String },

    #[error("serial ports are not available on this host: {0}")]
    SerialNotSupported(String),

    #[error("timed out connecting to {url}")]
    ConnectTimeout { url: String },

    #[error("failed to connect to {url}: {reason}")]
    ConnectFailed { url: String, reason: String },

    #[error("the device closed the connection")]
    ConnectionClosed,

    #[error("timed out waiting for the WebREPL password exchange")]
    AuthTimeout,

    #[error("the WebREPL password was rejected")]
    AuthFailed,

    #[error("write to device failed: {0}")]
    WriteFailed(String),

    #[error("the transport is already connected or connecting")]
    AlreadyConnected,
}

impl TransportError {
    /// Stable, machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::NotConnected => "NOT_CONNECTED",
            TransportError::NoDeviceSelected => "NO_DEVICE_SELECTED",
            TransportError::PortAlreadyInUse { .. } => "PORT_ALREADY_IN_USE",
            TransportError::PortOpenFailed { .. } => "PORT_OPEN_FAILED",
            TransportError::SerialNotSupported(_) => "WEB_SERIAL_NOT_SUPPORTED",
            TransportError::ConnectTimeout { .. } => "CONNECT_TIMEOUT",
            TransportError::ConnectFailed { .. } => "CONNECT_FAILED",
            TransportError::ConnectionClosed => "CONNECTION_CLOSED",
            TransportError::AuthTimeout => "AUTH_TIMEOUT",
            TransportError::AuthFailed => "AUTH_FAILED",
            TransportError::WriteFailed(_) => "WRITE_FAILED",
            TransportError::AlreadyConnected => "ALREADY_CONNECTED",
        }
    }

    /// What the user can do about it.
    pub fn hint(&self) -> &'static str {
        match self {
            TransportError::NotConnected => "Connect to the device first.",
            TransportError::NoDeviceSelected => {
                "Plug the device in with a data-capable USB cable and pick its port."
            }
            TransportError::PortAlreadyInUse { .. } => {
                "Close other programs (serial monitors, IDEs) that have the port open."
            }
            TransportError::PortOpenFailed { .. } => {
                "Unplug and re-plug the device, then try again."
            }
            TransportError::SerialNotSupported(_) => {
                "Serial ports are unavailable here; try the WiFi connection instead."
            }
            TransportError::ConnectTimeout { .. } | TransportError::ConnectFailed { .. } => {
                "Check the IP address and that the device is on the same network."
            }
            TransportError::ConnectionClosed => {
                "Is the firmware running? Make sure WebREPL is enabled on the device."
            }
            TransportError::AuthTimeout => "Is the firmware running? The device never asked for a password.",
            TransportError::AuthFailed => "Check the WebREPL password.",
            TransportError::WriteFailed(_) => "The connection dropped; reconnect and try again.",
            TransportError::AlreadyConnected => "Disconnect before connecting again.",
        }
    }
}

/// Lifecycle state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
    Closing,
}

/// Fan-out of transport events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<TransportEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns a receiver that sees every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.tx.subscribe()
    }

    /// Publishes `event`.  Having no subscribers is not an error.
    pub fn publish(&self, event: TransportEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Guarded lifecycle state plus the event hub, shared by every transport.
#[derive(Debug)]
pub struct Link {
    kind: TransportKind,
    state: Mutex<LinkState>,
    hub: EventHub,
}

impl Link {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            state: Mutex::new(LinkState::Idle),
            hub: EventHub::default(),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn state(&self) -> LinkState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// `Idle → Connecting`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadyConnected`] from any other state.
    pub fn begin_connect(&self) -> Result<(), TransportError> {
        self.transition(LinkState::Idle, LinkState::Connecting)
            .then_some(())
            .ok_or(TransportError::AlreadyConnected)
    }

    /// `Connecting → Idle` after a failed attempt.  No event is published,
    /// since no connection ever existed.
    pub fn abort_connect(&self) {
        self.transition(LinkState::Connecting, LinkState::Idle);
    }

    /// `Connecting → Connected`, publishing [`TransportEvent::Connected`].
    pub fn established(&self) {
        if self.transition(LinkState::Connecting, LinkState::Connected) {
            info!(transport = %self.kind, "connected");
            self.hub.publish(TransportEvent::Connected);
        }
    }

    /// `Connected → Closing`.
    ///
    /// Returns `true` for exactly one caller per connection; that caller owns
    /// the teardown and must finish it with [`Link::finish_teardown`].
    pub fn begin_teardown(&self) -> bool {
        self.transition(LinkState::Connected, LinkState::Closing)
    }

    /// `Closing → Idle`, publishing [`TransportEvent::Disconnected`].
    pub fn finish_teardown(&self) {
        if self.transition(LinkState::Closing, LinkState::Idle) {
            info!(transport = %self.kind, "disconnected");
            self.hub.publish(TransportEvent::Disconnected);
        }
    }

    fn transition(&self, from: LinkState, to: LinkState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return false;
        }
        debug!(transport = %self.kind, ?from, ?to, "link state change");
        *state = to;
        true
    }
}

/// A bidirectional text channel to the device.
///
/// Implementations use interior mutability so one transport can be shared
/// (`Arc<dyn Transport>`) between the REPL engine and a live terminal view.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn is_connected(&self) -> bool;

    /// Opens the link.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`] except `NotConnected`/`WriteFailed`.  On error
    /// the transport is back in `Idle` with nothing left open.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Closes the link.  Idempotent; safe on a never-connected transport.
    async fn disconnect(&self);

    /// Sends text.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotConnected`] when not connected (nothing is sent),
    /// [`TransportError::WriteFailed`] when the link broke; the transport is
    /// torn down before that error is returned.
    async fn write(&self, text: &str) -> Result<(), TransportError>;

    /// Sends raw bytes; same error contract as [`Transport::write`].
    async fn write_bytes(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Subscribes to this transport's events.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Connection capability detection.
//!
//! Answers "which transports can this host use, and which should the UI
//! offer first?" without opening anything.  The host itself is behind the
//! [`HostEnvironment`] trait so tests can describe any host with a mock.

use std::sync::Arc;

use serde::Serialize;

use crate::application::transport::TransportKind;

/// Side-effect-free queries about the host.
#[cfg_attr(test, mockall::automock)]
pub trait HostEnvironment: Send + Sync {
    /// `true` if serial ports can be enumerated and opened on this host.
    fn serial_available(&self) -> bool;

    /// `true` if outbound network sockets can be opened.
    fn network_available(&self) -> bool;
}

/// UI descriptor of one way to reach the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionMethod {
    #[serde(rename = "type")]
    pub kind: TransportKind,
    pub label: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
}

impl ConnectionMethod {
    /// The descriptor for `kind`.
    pub fn for_kind(kind: TransportKind) -> Self {
        match kind {
            TransportKind::UsbSerial => Self {
                kind,
                label: "USB Cable",
                description: "Connect directly with a USB-C data cable",
                icon: "usb",
            },
            TransportKind::WifiSocket => Self {
                kind,
                label: "WiFi",
                description: "Connect over WiFi using the device's WebREPL",
                icon: "wifi",
            },
        }
    }
}

/// Reports usable transports for a host.
#[derive(Clone)]
pub struct CapabilityDetector {
    host: Arc<dyn HostEnvironment>,
}

impl CapabilityDetector {
    pub fn new(host: Arc<dyn HostEnvironment>) -> Self {
        Self { host }
    }

    pub fn is_serial_supported(&self) -> bool {
        self.host.serial_available()
    }

    pub fn is_socket_supported(&self) -> bool {
        self.host.network_available()
    }

    /// Usable methods, serial first.
    pub fn available_methods(&self) -> Vec<ConnectionMethod> {
        let mut methods = Vec::with_capacity(2);
        if self.is_serial_supported() {
            methods.push(ConnectionMethod::for_kind(TransportKind::UsbSerial));
        }
        if self.is_socket_supported() {
            methods.push(ConnectionMethod::for_kind(TransportKind::WifiSocket));
        }
        methods
    }

    /// The first available method, if any.
    pub fn recommended_method(&self) -> Option<ConnectionMethod> {
        self.available_methods().into_iter().next()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

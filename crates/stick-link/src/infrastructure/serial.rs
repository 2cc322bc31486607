//! USB serial transport.
//!
//! # How the serial link works (for beginners)
//!
//! The handheld shows up as a USB-to-UART bridge chip.  We enumerate the host's
//! serial ports, keep the ones whose USB vendor/product IDs belong to a known
//! bridge, let a [`PortPicker`] choose one, and open it at 115 200 baud, 8N1,
//! no flow control.
//!
//! Reading is blocking in the `serialport` crate, so the read loop runs on a
//! `spawn_blocking` thread with a 10 ms read timeout.  A timeout just means
//! "nothing arrived yet"; any other read error (the device was unplugged)
//! ends the loop, and the loop's exit tears the link down exactly like
//! [`Transport::disconnect`] does.
//!
//! Writes go through a cloned handle on the blocking pool.  The handles share
//! the port's 10 ms timeout (on Windows the timeout belongs to the device, not
//! the handle), so [`write_within`] retries timed-out writes until its own,
//! longer budget runs out.
//!
//! Serial reads can split a multi-byte UTF-8 character across two chunks.
//! [`drain_utf8`] decodes what is complete and keeps the trailing fragment for
//! the next read.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::transport::{
    Link, Transport, TransportError, TransportEvent, TransportKind,
};

/// Read timeout of the blocking loop; bounds how long cancellation takes.
const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Budget for one write plus flush; a full REPL chunk drains well within it.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 1024;

/// A USB-to-UART bridge used on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbBridge {
    pub vid: u16,
    pub pid: u16,
    pub chip: &'static str,
}

/// Bridges the device ships with, across hardware revisions.
pub const KNOWN_BRIDGES: &[UsbBridge] = &[
    UsbBridge {
        vid: 0x0403,
        pid: 0x6001,
        chip: "FTDI FT231X",
    },
    UsbBridge {
        vid: 0x1A86,
        pid: 0x55D4,
        chip: "WCH CH9102",
    },
    UsbBridge {
        vid: 0x10C4,
        pid: 0xEA60,
        chip: "Silicon Labs CP210x",
    },
];

/// The bridge with this vendor/product pair, if it is one we know.
pub fn known_bridge(vid: u16, pid: u16) -> Option<&'static UsbBridge> {
    KNOWN_BRIDGES.iter().find(|b| b.vid == vid && b.pid == pid)
}

/// Serial link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port to open instead of auto-detecting, e.g. `/dev/ttyUSB0` or `COM3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_name: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    115_200
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: None,
            baud_rate: default_baud_rate(),
        }
    }
}

/// Chooses which port to open.
///
/// Returning `None` means the user declined to pick a device.
pub trait PortPicker: Send + Sync {
    /// `candidates` are the names of ports whose USB IDs match a known bridge.
    fn pick(&self, candidates: &[String]) -> Option<String>;
}

/// Picks the preferred port if one is configured, else the first candidate.
#[derive(Debug, Clone, Default)]
pub struct AutoPicker {
    preferred: Option<String>,
}

impl AutoPicker {
    pub fn new(preferred: Option<String>) -> Self {
        Self { preferred }
    }
}

impl PortPicker for AutoPicker {
    fn pick(&self, candidates: &[String]) -> Option<String> {
        self.preferred
            .clone()
            .or_else(|| candidates.first().cloned())
    }
}

/// Decodes the complete UTF-8 prefix of `pending` and removes it.
///
/// An incomplete trailing sequence stays in `pending` for the next read.
/// Invalid bytes become U+FFFD.
pub fn drain_utf8(pending: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                out.push_str(text);
                pending.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    None => {
                        pending.drain(..valid);
                        return out;
                    }
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + bad);
                    }
                }
            }
        }
    }
}

/// Translates an open failure into the transport's error vocabulary.
pub fn map_open_error(port: &str, e: &serialport::Error) -> TransportError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => TransportError::PortAlreadyInUse {
            port: port.to_string(),
        },
        _ => TransportError::PortOpenFailed {
            port: port.to_string(),
            reason: e.to_string(),
        },
    }
}

// ── Shared connection state ───────────────────────────────────────────────────

/// State shared between the transport handle and its read loop.
struct SerialShared {
    link: Link,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl SerialShared {
    /// Closes the port and publishes `Disconnected`.  Only the first caller
    /// per connection does anything.
    fn teardown(&self) {
        if !self.link.begin_teardown() {
            return;
        }
        if let Some(token) = lock(&self.cancel).take() {
            token.cancel();
        }
        lock(&self.writer).take();
        self.link.finish_teardown();
    }
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// [`Transport`] over a USB serial port.
pub struct SerialTransport {
    config: SerialConfig,
    picker: Arc<dyn PortPicker>,
    shared: Arc<SerialShared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SerialTransport {
    pub fn new(config: SerialConfig, picker: Arc<dyn PortPicker>) -> Self {
        Self {
            config,
            picker,
            shared: Arc::new(SerialShared {
                link: Link::new(TransportKind::UsbSerial),
                writer: Mutex::new(None),
                cancel: Mutex::new(None),
            }),
            reader: Mutex::new(None),
        }
    }

    /// A transport that opens the configured port, or the first known device.
    pub fn with_auto_picker(config: SerialConfig) -> Self {
        let picker = Arc::new(AutoPicker::new(config.port_name.clone()));
        Self::new(config, picker)
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn open(&self) -> Result<(String, Box<dyn SerialPort>), TransportError> {
        let ports = serialport::available_ports()
            .map_err(|e| TransportError::SerialNotSupported(e.to_string()))?;

        let candidates: Vec<String> = ports
            .into_iter()
            .filter(|p| match &p.port_type {
                SerialPortType::UsbPort(usb) => known_bridge(usb.vid, usb.pid).is_some(),
                _ => false,
            })
            .map(|p| p.port_name)
            .collect();
        debug!(?candidates, "known device ports");

        let name = self
            .picker
            .pick(&candidates)
            .ok_or(TransportError::NoDeviceSelected)?;

        let port = serialport::new(name.as_str(), self.config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| map_open_error(&name, &e))?;
        Ok((name, port))
    }

    /// Finishes a connect once the port is open: stores the writer, marks the
    /// link connected and starts the read loop.
    ///
    /// The link must already be `Connecting`.
    fn attach(&self, name: &str, writer: Box<dyn SerialPort>, reader: Box<dyn SerialPort>) {
        let token = CancellationToken::new();
        *lock(&self.shared.writer) = Some(writer);
        *lock(&self.shared.cancel) = Some(token.clone());
        self.shared.link.established();
        info!(port = %name, baud = self.config.baud_rate, "serial port open");

        let shared = Arc::clone(&self.shared);
        let handle = tokio::task::spawn_blocking(move || read_loop(reader, shared, token));
        *lock(&self.reader) = Some(handle);
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::UsbSerial
    }

    fn is_connected(&self) -> bool {
        self.shared.link.is_connected()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.shared.link.begin_connect()?;

        let opened = self.open().and_then(|(name, reader)| {
            let writer = reader.try_clone().map_err(|e| map_open_error(&name, &e))?;
            Ok((name, writer, reader))
        });
        match opened {
            Ok((name, writer, reader)) => {
                self.attach(&name, writer, reader);
                Ok(())
            }
            Err(e) => {
                warn!(code = e.code(), "serial connect failed: {e}");
                self.shared.link.abort_connect();
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        self.shared.teardown();
        let handle = lock(&self.reader).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("serial read loop ended abnormally: {e}");
            }
        }
    }

    async fn write(&self, text: &str) -> Result<(), TransportError> {
        self.write_bytes(text.as_bytes()).await
    }

    async fn write_bytes(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.shared.link.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let shared = Arc::clone(&self.shared);
        let bytes = bytes.to_vec();
        let result = tokio::task::spawn_blocking(move || -> Result<(), TransportError> {
            let mut writer = lock(&shared.writer);
            let port = writer.as_mut().ok_or(TransportError::NotConnected)?;
            write_within(&mut **port, &bytes, WRITE_TIMEOUT)
                .map_err(|e| TransportError::WriteFailed(e.to_string()))
        })
        .await
        .unwrap_or_else(|e| Err(TransportError::WriteFailed(e.to_string())));

        match result {
            Err(TransportError::WriteFailed(reason)) => {
                warn!("serial write failed: {reason}");
                self.shared.teardown();
                Err(TransportError::WriteFailed(reason))
            }
            other => other,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.link.hub().subscribe()
    }
}

/// Writes and flushes all of `bytes`, retrying timed-out attempts until
/// `budget` has elapsed.
fn write_within(port: &mut dyn SerialPort, mut bytes: &[u8], budget: Duration) -> io::Result<()> {
    let deadline = Instant::now() + budget;
    let retry = |e: &io::Error| match e.kind() {
        io::ErrorKind::Interrupted => true,
        io::ErrorKind::TimedOut => Instant::now() < deadline,
        _ => false,
    };

    while !bytes.is_empty() {
        match port.write(bytes) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => bytes = &bytes[n..],
            Err(e) if retry(&e) => {}
            Err(e) => return Err(e),
        }
    }
    loop {
        match port.flush() {
            Ok(()) => return Ok(()),
            Err(e) if retry(&e) => {}
            Err(e) => return Err(e),
        }
    }
}

fn read_loop(mut port: Box<dyn SerialPort>, shared: Arc<SerialShared>, token: CancellationToken) {
    let mut chunk = [0u8; READ_CHUNK];
    let mut pending = Vec::new();

    while !token.is_cancelled() {
        match port.read(&mut chunk) {
            Ok(0) => {}
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                let text = drain_utf8(&mut pending);
                if !text.is_empty() {
                    shared.link.hub().publish(TransportEvent::Data(text));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                warn!("serial read failed, device unplugged? {e}");
                shared
                    .link
                    .hub()
                    .publish(TransportEvent::Error(format!("serial read failed: {e}")));
                break;
            }
        }
    }

    debug!("serial read loop exiting");
    // A cancelled token means teardown already ran for this connection.
    if !token.is_cancelled() {
        shared.teardown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    #[test]
    fn test_drain_utf8_decodes_complete_text() {
        let mut pending = b"hello".to_vec();
        assert_eq!(drain_utf8(&mut pending), "hello");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_drain_utf8_keeps_split_multibyte_tail() {
        // Arrange: "é" is 0xC3 0xA9; the chunk ends after the first byte.
        let mut pending = vec![b'a', 0xC3];

        // Act
        let first = drain_utf8(&mut pending);
        pending.push(0xA9);
        let second = drain_utf8(&mut pending);

        // Assert
        assert_eq!(first, "a");
        assert_eq!(second, "é");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_drain_utf8_replaces_invalid_bytes() {
        let mut pending = vec![b'a', 0xFF, b'b'];
        assert_eq!(drain_utf8(&mut pending), "a\u{FFFD}b");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_known_bridges_match_device_ids() {
        assert_eq!(known_bridge(0x0403, 0x6001).map(|b| b.chip), Some("FTDI FT231X"));
        assert!(known_bridge(0x1A86, 0x55D4).is_some());
        assert!(known_bridge(0x10C4, 0xEA60).is_some());
        assert!(known_bridge(0x2341, 0x0043).is_none());
    }

    #[test]
    fn test_auto_picker_prefers_configured_port() {
        let picker = AutoPicker::new(Some("/dev/ttyACM7".into()));
        let candidates = vec!["/dev/ttyUSB0".to_string()];
        assert_eq!(picker.pick(&candidates).as_deref(), Some("/dev/ttyACM7"));
    }

    #[test]
    fn test_auto_picker_takes_first_candidate_or_none() {
        let picker = AutoPicker::default();
        assert_eq!(
            picker.pick(&["/dev/ttyUSB0".to_string(), "/dev/ttyUSB1".to_string()]),
            Some("/dev/ttyUSB0".to_string())
        );
        assert_eq!(picker.pick(&[]), None);
    }

    #[test]
    fn test_busy_port_maps_to_already_in_use() {
        let busy = serialport::Error::new(serialport::ErrorKind::NoDevice, "busy");
        let other = serialport::Error::new(serialport::ErrorKind::Unknown, "boom");

        assert_eq!(map_open_error("COM3", &busy).code(), "PORT_ALREADY_IN_USE");
        assert_eq!(map_open_error("COM3", &other).code(), "PORT_OPEN_FAILED");
    }

    #[tokio::test]
    async fn test_write_before_connect_is_not_connected() {
        let transport = SerialTransport::with_auto_picker(SerialConfig::default());
        assert_eq!(
            transport.write("x").await,
            Err(TransportError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_disconnect_never_connected_is_noop() {
        // Arrange
        let transport = SerialTransport::with_auto_picker(SerialConfig::default());
        let mut rx = transport.subscribe();

        // Act
        transport.disconnect().await;
        transport.disconnect().await;

        // Assert: no Disconnected event for a link that never existed
        assert!(rx.try_recv().is_err());
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_config_defaults_to_115200_baud() {
        let cfg: SerialConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.port_name, None);
    }

    // ── Scripted port ─────────────────────────────────────────────────────────

    /// In-memory `SerialPort`.  Reads pop `reads` and then time out; writes
    /// pop `write_faults` before being recorded.  Clones share all state.
    #[derive(Default, Clone)]
    struct FakePort {
        reads: Arc<Mutex<VecDeque<io::Result<Vec<u8>>>>>,
        write_faults: Arc<Mutex<VecDeque<io::ErrorKind>>>,
        written: Arc<Mutex<Vec<u8>>>,
        stalled: bool,
    }

    impl FakePort {
        fn with_reads(reads: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                reads: Arc::new(Mutex::new(reads.into())),
                ..Self::default()
            }
        }

        fn with_write_faults(faults: &[io::ErrorKind]) -> Self {
            Self {
                write_faults: Arc::new(Mutex::new(faults.iter().copied().collect())),
                ..Self::default()
            }
        }

        fn written(&self) -> Vec<u8> {
            lock(&self.written).clone()
        }
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let next = lock(&self.reads).pop_front();
            match next {
                Some(Ok(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => {
                    std::thread::sleep(Duration::from_millis(1));
                    Err(io::ErrorKind::TimedOut.into())
                }
            }
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.stalled {
                std::thread::sleep(Duration::from_millis(1));
                return Err(io::ErrorKind::TimedOut.into());
            }
            if let Some(kind) = lock(&self.write_faults).pop_front() {
                return Err(kind.into());
            }
            lock(&self.written).extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialPort for FakePort {
        fn name(&self) -> Option<String> {
            Some("fake".into())
        }
        fn baud_rate(&self) -> serialport::Result<u32> {
            Ok(115_200)
        }
        fn data_bits(&self) -> serialport::Result<DataBits> {
            Ok(DataBits::Eight)
        }
        fn flow_control(&self) -> serialport::Result<FlowControl> {
            Ok(FlowControl::None)
        }
        fn parity(&self) -> serialport::Result<Parity> {
            Ok(Parity::None)
        }
        fn stop_bits(&self) -> serialport::Result<StopBits> {
            Ok(StopBits::One)
        }
        fn timeout(&self) -> Duration {
            READ_TIMEOUT
        }
        fn set_baud_rate(&mut self, _: u32) -> serialport::Result<()> {
            Ok(())
        }
        fn set_data_bits(&mut self, _: DataBits) -> serialport::Result<()> {
            Ok(())
        }
        fn set_flow_control(&mut self, _: FlowControl) -> serialport::Result<()> {
            Ok(())
        }
        fn set_parity(&mut self, _: Parity) -> serialport::Result<()> {
            Ok(())
        }
        fn set_stop_bits(&mut self, _: StopBits) -> serialport::Result<()> {
            Ok(())
        }
        fn set_timeout(&mut self, _: Duration) -> serialport::Result<()> {
            Ok(())
        }
        fn write_request_to_send(&mut self, _: bool) -> serialport::Result<()> {
            Ok(())
        }
        fn write_data_terminal_ready(&mut self, _: bool) -> serialport::Result<()> {
            Ok(())
        }
        fn read_clear_to_send(&mut self) -> serialport::Result<bool> {
            Ok(true)
        }
        fn read_data_set_ready(&mut self) -> serialport::Result<bool> {
            Ok(true)
        }
        fn read_ring_indicator(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }
        fn read_carrier_detect(&mut self) -> serialport::Result<bool> {
            Ok(true)
        }
        fn bytes_to_read(&self) -> serialport::Result<u32> {
            Ok(0)
        }
        fn bytes_to_write(&self) -> serialport::Result<u32> {
            Ok(0)
        }
        fn clear(&self, _: serialport::ClearBuffer) -> serialport::Result<()> {
            Ok(())
        }
        fn try_clone(&self) -> serialport::Result<Box<dyn SerialPort>> {
            Ok(Box::new(self.clone()))
        }
        fn set_break(&self) -> serialport::Result<()> {
            Ok(())
        }
        fn clear_break(&self) -> serialport::Result<()> {
            Ok(())
        }
    }

    /// A transport wired to `port` as if `connect` had just opened it.
    fn attached(port: &FakePort) -> (SerialTransport, broadcast::Receiver<TransportEvent>) {
        let transport = SerialTransport::with_auto_picker(SerialConfig::default());
        let rx = transport.subscribe();
        transport.shared.link.begin_connect().unwrap();
        transport.attach("fake", Box::new(port.clone()), Box::new(port.clone()));
        (transport, rx)
    }

    async fn events_until_disconnected(
        rx: &mut broadcast::Receiver<TransportEvent>,
    ) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("no Disconnected within 2 s")
                .unwrap();
            let done = event == TransportEvent::Disconnected;
            events.push(event);
            if done {
                return events;
            }
        }
    }

    // ── Read loop and writer ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_read_error_ends_loop_and_disconnects_once() {
        // Arrange: one chunk, then the device vanishes.
        let port = FakePort::with_reads(vec![
            Ok(b"hi".to_vec()),
            Err(io::ErrorKind::BrokenPipe.into()),
        ]);
        let (transport, mut rx) = attached(&port);

        // Act
        let events = events_until_disconnected(&mut rx).await;
        transport.disconnect().await;

        // Assert
        assert_eq!(events[0], TransportEvent::Connected);
        assert_eq!(events[1], TransportEvent::Data("hi".into()));
        assert!(matches!(&events[2], TransportEvent::Error(msg) if msg.contains("serial read failed")));
        assert_eq!(events[3], TransportEvent::Disconnected);
        assert_eq!(events.len(), 4);
        assert!(!transport.is_connected());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_reaches_writer_handle() {
        // Arrange
        let port = FakePort::default();
        let (transport, _rx) = attached(&port);

        // Act
        let result = transport.write("print(1)\r").await;
        transport.disconnect().await;

        // Assert
        assert_eq!(result, Ok(()));
        assert_eq!(port.written(), b"print(1)\r");
        assert_eq!(transport.write("x").await, Err(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_failed_write_tears_link_down() {
        // Arrange
        let port = FakePort::with_write_faults(&[io::ErrorKind::BrokenPipe]);
        let (transport, mut rx) = attached(&port);

        // Act
        let result = transport.write_bytes(&[0x03]).await;
        let events = events_until_disconnected(&mut rx).await;

        // Assert
        assert!(matches!(result, Err(TransportError::WriteFailed(_))));
        assert!(!transport.is_connected());
        assert_eq!(events.last(), Some(&TransportEvent::Disconnected));
        transport.disconnect().await;
    }

    #[test]
    fn test_write_within_retries_timeouts() {
        // Arrange
        let mut port =
            FakePort::with_write_faults(&[io::ErrorKind::TimedOut, io::ErrorKind::TimedOut]);

        // Act
        let result = write_within(&mut port, b"abc", Duration::from_secs(1));

        // Assert
        assert!(result.is_ok());
        assert_eq!(port.written(), b"abc");
    }

    #[test]
    fn test_write_within_gives_up_after_budget() {
        // Arrange
        let mut port = FakePort {
            stalled: true,
            ..FakePort::default()
        };
        let start = Instant::now();

        // Act
        let result = write_within(&mut port, b"abc", Duration::from_millis(20));

        // Assert
        assert_eq!(result.map_err(|e| e.kind()), Err(io::ErrorKind::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_write_within_does_not_retry_hard_errors() {
        let mut port = FakePort::with_write_faults(&[io::ErrorKind::BrokenPipe]);

        let result = write_within(&mut port, b"abc", Duration::from_secs(1));

        assert_eq!(result.map_err(|e| e.kind()), Err(io::ErrorKind::BrokenPipe));
        assert!(port.written().is_empty());
    }
}

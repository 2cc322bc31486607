//! In-memory test doubles: a scripted transport and a recording canvas.
//!
//! # Why hand-written doubles?
//!
//! The real transports need a device on a cable or a WebREPL on the network.
//! [`MockTransport`] replaces the device with a [`ScriptedDevice`] that
//! answers control signals the way MicroPython firmware does, and records
//! every write so tests can assert exactly what went over the wire and in
//! what order.
//!
//! # Usage in tests
//!
//! ```ignore
//! let transport = Arc::new(MockTransport::connected());
//! let mut engine = ReplEngine::new(Arc::clone(&transport), fast_timings());
//!
//! engine.interrupt().await.unwrap();
//!
//! assert_eq!(transport.signal_count(CTRL_INTERRUPT), 4);
//! ```
//!
//! # `should_fail` flag
//!
//! Set `should_fail = true` before sharing the transport to make every write
//! fail.  The transport tears itself down first, like a real broken link.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;

use stick_core::protocol::{
    CTRL_ENTER_RAW, CTRL_EXECUTE, CTRL_EXIT_RAW, CTRL_INTERRUPT, RAW_MODE_BANNER,
};
use stick_core::{Canvas, OutputSnapshot, Rgb};

use crate::application::transport::{
    Link, Transport, TransportError, TransportEvent, TransportKind,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Scripted device ───────────────────────────────────────────────────────────

/// Firmware stand-in that answers control signals.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDevice {
    /// Printed by every execution.
    pub stdout: String,
    /// Traceback reported by every execution.
    pub stderr: String,
    /// Number of raw-mode requests (Ctrl-A) to ignore before answering.
    pub ignore_raw_requests: u32,
    /// Never finish an execution: reply with `OK` and stdout but no markers.
    pub hang_on_execute: bool,
    pub raw: bool,
    pub submitted: String,
}

impl ScriptedDevice {
    /// A device whose programs print `stdout`.
    pub fn printing(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn is_raw(&self) -> bool {
        self.raw
    }

    /// Code received in raw mode since the last execution.
    pub fn submitted(&self) -> &str {
        &self.submitted
    }

    /// Replies the firmware would send after receiving `bytes`.
    pub fn respond(&mut self, bytes: &[u8]) -> Vec<String> {
        match bytes {
            [CTRL_ENTER_RAW] => {
                if self.ignore_raw_requests > 0 {
                    self.ignore_raw_requests -= 1;
                    return Vec::new();
                }
                self.raw = true;
                self.submitted.clear();
                vec![format!("{RAW_MODE_BANNER}\r\n>")]
            }
            [CTRL_EXIT_RAW] => {
                self.raw = false;
                vec!["\r\nMicroPython v1.22.0 on M5StickC\r\n>>> ".to_string()]
            }
            [CTRL_INTERRUPT] => Vec::new(),
            [CTRL_EXECUTE] if self.raw => {
                if self.hang_on_execute {
                    vec![format!("OK{}", self.stdout)]
                } else {
                    vec![format!("OK{}\x04{}\x04>", self.stdout, self.stderr)]
                }
            }
            [CTRL_EXECUTE] => vec!["MPY: soft reboot\r\n>>> ".to_string()],
            text => {
                if self.raw {
                    self.submitted.push_str(&String::from_utf8_lossy(text));
                }
                Vec::new()
            }
        }
    }
}

// ── Mock transport ────────────────────────────────────────────────────────────

/// A [`Transport`] backed by a [`ScriptedDevice`] that records every write.
pub struct MockTransport {
    link: Link,
    device: Mutex<ScriptedDevice>,
    /// Every successful write, in order.
    pub writes: Mutex<Vec<Vec<u8>>>,
    /// When `true`, writes tear the link down and fail with `WriteFailed`.
    pub should_fail: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(ScriptedDevice::default())
    }
}

impl MockTransport {
    /// A disconnected transport in front of `device`.
    pub fn new(device: ScriptedDevice) -> Self {
        Self {
            link: Link::new(TransportKind::UsbSerial),
            device: Mutex::new(device),
            writes: Mutex::new(Vec::new()),
            should_fail: false,
        }
    }

    /// A transport that is already connected to a default device.
    pub fn connected() -> Self {
        Self::connected_to(ScriptedDevice::default())
    }

    /// A transport that is already connected to `device`.
    pub fn connected_to(device: ScriptedDevice) -> Self {
        let transport = Self::new(device);
        transport.bring_up();
        transport
    }

    /// Publishes `text` as if the device had sent it.
    pub fn push_data(&self, text: &str) {
        self.link.hub().publish(TransportEvent::Data(text.to_string()));
    }

    /// Simulates the cable being pulled.
    pub fn drop_link(&self) {
        if self.link.begin_teardown() {
            self.link.finish_teardown();
        }
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.writes).clone()
    }

    /// The single-byte control signals written, in order.
    pub fn signals(&self) -> Vec<u8> {
        lock(&self.writes)
            .iter()
            .filter_map(|w| match w.as_slice() {
                [b] if *b < 0x20 => Some(*b),
                _ => None,
            })
            .collect()
    }

    /// How many times `signal` was written on its own.
    pub fn signal_count(&self, signal: u8) -> usize {
        self.signals().iter().filter(|b| **b == signal).count()
    }

    /// All non-signal writes joined together.
    pub fn written_text(&self) -> String {
        lock(&self.writes)
            .iter()
            .filter(|w| !matches!(w.as_slice(), [b] if *b < 0x20))
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    /// Code the device received in raw mode.
    pub fn submitted_code(&self) -> String {
        lock(&self.device).submitted().to_string()
    }

    fn bring_up(&self) {
        if self.link.begin_connect().is_ok() {
            self.link.established();
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.link.kind()
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.link.begin_connect()?;
        self.link.established();
        Ok(())
    }

    async fn disconnect(&self) {
        self.drop_link();
    }

    async fn write(&self, text: &str) -> Result<(), TransportError> {
        self.write_bytes(text.as_bytes()).await
    }

    async fn write_bytes(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.link.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.should_fail {
            self.drop_link();
            return Err(TransportError::WriteFailed("mock failure".into()));
        }
        lock(&self.writes).push(bytes.to_vec());
        let replies = lock(&self.device).respond(bytes);
        for reply in replies {
            self.push_data(&reply);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.link.hub().subscribe()
    }
}

// ── Recording canvas ──────────────────────────────────────────────────────────

/// One call made on a [`RecordingCanvas`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanvasCall {
    Clear(Option<Rgb>),
    Text {
        x: i32,
        y: i32,
        text: String,
        color: Option<Rgb>,
    },
    Rect {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        color: Option<Rgb>,
        filled: bool,
    },
    Circle {
        x: i32,
        y: i32,
        radius: i32,
        color: Option<Rgb>,
        filled: bool,
    },
    Line {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        color: Option<Rgb>,
    },
    Pixel {
        x: i32,
        y: i32,
        color: Option<Rgb>,
    },
    SetTextColor(Rgb),
    SetTextSize(u32),
    Tone {
        frequency_hz: u32,
        duration_ms: u32,
    },
}

/// A [`Canvas`] that records calls instead of drawing.
#[derive(Debug, Default)]
pub struct RecordingCanvas {
    pub calls: Vec<CanvasCall>,
    snapshot: OutputSnapshot,
}

impl RecordingCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Texts drawn, in call order, duplicates included.
    pub fn texts(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                CanvasCall::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Canvas for RecordingCanvas {
    fn clear(&mut self, color: Option<Rgb>) {
        self.calls.push(CanvasCall::Clear(color));
    }

    fn draw_text(&mut self, x: i32, y: i32, text: &str, color: Option<Rgb>) {
        self.snapshot.record_text(text);
        self.calls.push(CanvasCall::Text {
            x,
            y,
            text: text.to_string(),
            color,
        });
    }

    fn draw_rect(&mut self, x: i32, y: i32, width: i32, height: i32, color: Option<Rgb>, filled: bool) {
        self.calls.push(CanvasCall::Rect {
            x,
            y,
            width,
            height,
            color,
            filled,
        });
    }

    fn draw_circle(&mut self, x: i32, y: i32, radius: i32, color: Option<Rgb>, filled: bool) {
        self.calls.push(CanvasCall::Circle {
            x,
            y,
            radius,
            color,
            filled,
        });
    }

    fn draw_line(&mut self, x1: i32, y1: i32, x2: i32, y2: i32, color: Option<Rgb>) {
        self.calls.push(CanvasCall::Line {
            x1,
            y1,
            x2,
            y2,
            color,
        });
    }

    fn draw_pixel(&mut self, x: i32, y: i32, color: Option<Rgb>) {
        self.calls.push(CanvasCall::Pixel { x, y, color });
    }

    fn set_text_color(&mut self, color: Rgb) {
        self.calls.push(CanvasCall::SetTextColor(color));
    }

    fn set_text_size(&mut self, size: u32) {
        self.calls.push(CanvasCall::SetTextSize(size));
    }

    fn record_tone(&mut self, frequency_hz: u32, duration_ms: u32) {
        self.snapshot.sound_produced = true;
        self.calls.push(CanvasCall::Tone {
            frequency_hz,
            duration_ms,
        });
    }

    fn snapshot(&self) -> OutputSnapshot {
        self.snapshot.clone()
    }

    fn clear_snapshot(&mut self) {
        self.snapshot.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_answers_raw_request_with_banner() {
        let mut device = ScriptedDevice::default();
        let replies = device.respond(&[CTRL_ENTER_RAW]);
        assert!(replies[0].contains(RAW_MODE_BANNER));
        assert!(device.is_raw());
    }

    #[test]
    fn test_device_ignores_configured_raw_requests() {
        let mut device = ScriptedDevice {
            ignore_raw_requests: 1,
            ..ScriptedDevice::default()
        };
        assert!(device.respond(&[CTRL_ENTER_RAW]).is_empty());
        assert_eq!(device.respond(&[CTRL_ENTER_RAW]).len(), 1);
    }

    #[test]
    fn test_device_frames_execution_output() {
        let mut device = ScriptedDevice::printing("hi\r\n");
        device.respond(&[CTRL_ENTER_RAW]);
        device.respond(b"print('hi')\n");

        let replies = device.respond(&[CTRL_EXECUTE]);

        assert_eq!(replies, vec!["OKhi\r\n\x04\x04>".to_string()]);
        assert_eq!(device.submitted(), "print('hi')\n");
    }

    #[tokio::test]
    async fn test_mock_records_writes_and_splits_signals() {
        // Arrange
        let transport = MockTransport::connected();

        // Act
        transport.write_bytes(&[CTRL_INTERRUPT]).await.unwrap();
        transport.write("\r\n").await.unwrap();

        // Assert
        assert_eq!(transport.signals(), vec![CTRL_INTERRUPT]);
        assert_eq!(transport.written_text(), "\r\n");
        assert_eq!(transport.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_write_tears_link_down() {
        let mut transport = MockTransport::connected();
        transport.should_fail = true;
        let mut rx = transport.subscribe();

        let result = transport.write("x").await;

        assert!(matches!(result, Err(TransportError::WriteFailed(_))));
        assert!(!transport.is_connected());
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Disconnected);
    }

    #[test]
    fn test_recording_canvas_tracks_snapshot() {
        let mut canvas = RecordingCanvas::new();
        canvas.draw_text(0, 0, "Hi", None);
        canvas.draw_text(0, 10, "Hi", None);
        canvas.record_tone(440, 100);

        let snap = canvas.snapshot();
        assert_eq!(snap.texts, vec!["Hi".to_string()]);
        assert!(snap.sound_produced);
        assert_eq!(canvas.texts(), vec!["Hi", "Hi"]);
    }
}

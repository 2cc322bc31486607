//! Control signals and fixed markers of the MicroPython REPL.
//!
//! # How the device prompt works (for beginners)
//!
//! The device runs an interactive prompt (a REPL).  A human sees the
//! "friendly" prompt (`>>> `).  Programs are submitted through a second,
//! machine-addressable "raw" mode that does not echo input:
//!
//! ```text
//! friendly  ──Ctrl-A──▶  raw  ──Ctrl-D──▶  executes buffered code
//!    ▲                    │
//!    └──────Ctrl-B────────┘
//! ```
//!
//! Ctrl-C interrupts whatever is running.  Ctrl-D at the friendly prompt
//! performs a soft reset (reboots the interpreter, not the chip).

/// Ctrl-A: enter raw REPL mode.
pub const CTRL_ENTER_RAW: u8 = 0x01;

/// Ctrl-B: exit raw REPL mode back to the friendly prompt.
pub const CTRL_EXIT_RAW: u8 = 0x02;

/// Ctrl-C: keyboard interrupt.
pub const CTRL_INTERRUPT: u8 = 0x03;

/// Ctrl-D: execute the buffered code (raw mode) or soft reset (friendly mode).
pub const CTRL_EXECUTE: u8 = 0x04;

/// Line terminator used to nudge the prompt.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Banner printed by the device once raw mode is active.
pub const RAW_MODE_BANNER: &str = "raw REPL; CTRL-B to exit";

/// Prefix the device emits when it has accepted a raw-mode submission.
pub const OUTPUT_START_MARKER: &str = "OK";

/// Byte separating stdout from stderr, and stderr from the final prompt.
pub const SEGMENT_SEPARATOR: char = '\x04';

/// Prompt character that follows the final separator once execution is done.
pub const RAW_PROMPT: char = '>';

/// Marker inserted between stdout and stderr when both are reported.
pub const STDERR_SEPARATOR: &str = "\n--- stderr ---\n";

/// Number of Ctrl-C signals in one interrupt burst.
pub const INTERRUPT_BURST: usize = 4;

/// Returns the raw byte for a single control signal as a one-byte slice.
///
/// Transports accept `&[u8]`, so callers write `transport.write_bytes(&signal(CTRL_INTERRUPT))`.
pub fn signal(byte: u8) -> [u8; 1] {
    [byte]
}

/// Returns `true` when `buffer` contains the raw-mode banner.
pub fn has_raw_banner(buffer: &str) -> bool {
    buffer.contains(RAW_MODE_BANNER)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

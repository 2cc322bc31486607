//! # stick-core
//!
//! Shared library for Stick-Link containing the MicroPython REPL control
//! protocol, the 135×240 raster display model, and the program model used by
//! the bounded code-execution simulator.
//!
//! This crate has zero dependencies on OS APIs, async runtimes, or sockets.
//! Everything here is pure data and pure functions, so it can be unit-tested
//! on any machine without a device attached.
//!
//! # Architecture overview (for beginners)
//!
//! Stick-Link takes a code string (typed by a learner or emitted by a block
//! editor) and either sends it to a real handheld device or replays it on an
//! on-screen model of the device's display.  This crate defines:
//!
//! - **`protocol`** – The bytes the device's interactive prompt understands:
//!   Ctrl-A/B/C/D control signals, the raw-mode banner, the execution
//!   completion marker, and the WebREPL password exchange.
//!
//! - **`display`** – The raster display model: a 135×240 pixel surface, the
//!   color resolver (named / packed 16-bit / CSS-style colors), and the output
//!   snapshot read back by lesson validation.
//!
//! - **`sim`** – The simulator's program model: a line classifier that turns
//!   each source line into a typed command (or nothing), loop headers, and
//!   indentation-based block detection.

pub mod display;
pub mod protocol;
pub mod sim;

// Re-export the most-used types at the crate root so callers can write
// `stick_core::DisplaySurface` instead of `stick_core::display::surface::DisplaySurface`.
pub use display::color::{resolve_color, Rgb};
pub use display::surface::{Canvas, DisplaySurface, OutputSnapshot};
pub use protocol::output::{parse_execution_output, ExecutionOutput};
pub use sim::command::SimCommand;
pub use sim::program::{LoopKind, Program, Stmt};

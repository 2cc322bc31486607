//! stick-link library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does stick-link do? (for beginners)
//!
//! A learner writes a short MicroPython program for a 135×240 handheld
//! device.  stick-link either:
//!
//! 1. Opens a **transport** to the real device (USB serial cable or the
//!    device's WebREPL WiFi bridge), breaks the device out of whatever it is
//!    running, switches its prompt to raw mode, submits the program, and
//!    collects stdout/stderr until the completion marker arrives; or
//! 2. Replays the program in the **simulator**, which understands a small,
//!    fixed vocabulary of drawing/sound/sleep calls plus two loop forms, and
//!    always terminates because every loop is capped.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! [stick-link]
//!   ├── application/      Transport contract, REPL engine, simulator runner,
//!   │                     capability detector (traits + use cases, no OS calls)
//!   └── infrastructure/
//!         ├── serial      USB serial transport (serialport)
//!         ├── socket      WebREPL transport (tokio-tungstenite)
//!         ├── host        Native host capability probe
//!         ├── mock        Recording test doubles
//!         └── storage     TOML configuration file
//! ```
//!
//! `application` depends on `stick-core` and traits only; every OS and network
//! resource lives in `infrastructure`.

/// Application layer: use cases and the traits they depend on.
pub mod application;

/// Infrastructure layer: transports, host probe, storage, test doubles.
pub mod infrastructure;

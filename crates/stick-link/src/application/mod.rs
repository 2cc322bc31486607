//! Application layer use cases for stick-link.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the pure core
//! (`stick-core`) and the infrastructure (serial ports, sockets, files).
//! Code here depends on abstractions, never on a concrete transport:
//!
//! - **`transport`**    – The [`Transport`](transport::Transport) contract every
//!   device link implements, its event stream, errors, and lifecycle state.
//! - **`capabilities`** – Which transports the host can use, and which one to
//!   recommend.
//! - **`repl`**         – The REPL protocol engine: raw mode, code execution,
//!   interrupt, soft reset.
//! - **`simulate`**     – The bounded simulator runner: iteration ceiling,
//!   capped sleeps, cancellation.

pub mod capabilities;
pub(crate) mod millis;
pub mod repl;
pub mod simulate;
pub mod transport;

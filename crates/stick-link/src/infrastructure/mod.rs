//! Infrastructure layer for stick-link.
//!
//! Contains the OS-facing adapters: the USB serial and WebREPL socket
//! transports, the native host probe used by capability detection, the
//! configuration file store, and recording doubles for tests.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `stick_core`, but MUST NOT be imported by the `application` layer.

pub mod host;
pub mod mock;
pub mod serial;
pub mod socket;
pub mod storage;

//! Protocol module containing REPL control signals, execution-output parsing,
//! and the WebREPL password exchange.

pub mod auth;
pub mod control;
pub mod output;

pub use auth::{AuthExchange, AuthStep};
pub use control::*;
pub use output::{is_execution_complete, parse_execution_output, ExecutionOutput, ProtocolError};

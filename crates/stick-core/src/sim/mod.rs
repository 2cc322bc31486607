//! Program model for the bounded code-execution simulator.
//!
//! The simulator is not a Python interpreter.  It recognises a closed set of
//! device calls and two loop forms, and silently skips everything else:
//!
//! - **`classify`** – one line in, one [`LineKind`] out.
//! - **`command`** – the [`SimCommand`] enum and how each variant draws on a
//!   [`Canvas`](crate::display::Canvas).
//! - **`program`** – indentation-based block detection producing a
//!   [`Program`] tree.
//!
//! Executing the tree (iteration ceiling, sleeps, cancellation) is the job of
//! the async runner in `stick-link`.

pub mod classify;
pub mod command;
pub mod program;

pub use classify::{classify_line, LineKind};
pub use command::SimCommand;
pub use program::{LoopKind, Program, Stmt};

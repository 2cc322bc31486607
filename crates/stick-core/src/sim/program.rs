//! Program tree built from source text by indentation-based block detection.
//!
//! ```text
//! lcd.clear()                 Command(Clear)
//! for i in range(3):          Loop { ForRange(3),
//!     lcd.print("hi", 0, 0)       [ Command(Text),
//!     while True:                   Loop { WhileTrue,
//!         time.sleep(1)                 [ Command(Sleep) ] } ] }
//! ```
//!
//! The body of a loop header is the maximal run of following lines whose
//! indentation is at least that of the first body line.  Blank and comment
//! lines inside that run belong to the body.  The first body line must be
//! indented deeper than the header; otherwise the loop has an empty body.

use serde::Serialize;

use crate::sim::classify::{classify_line, indentation, LineKind};
use crate::sim::command::SimCommand;

/// Kind of loop a header introduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "count", rename_all = "snake_case")]
pub enum LoopKind {
    WhileTrue,
    /// Requested iteration count, before any ceiling is applied.
    ForRange(u32),
}

impl LoopKind {
    /// Iterations this loop actually runs under `ceiling`.
    pub fn iterations(self, ceiling: u32) -> u32 {
        match self {
            LoopKind::WhileTrue => ceiling,
            LoopKind::ForRange(n) => n.min(ceiling),
        }
    }

    /// Returns `true` when `ceiling` cuts this loop short.
    pub fn is_truncated(self, ceiling: u32) -> bool {
        match self {
            LoopKind::WhileTrue => true,
            LoopKind::ForRange(n) => n > ceiling,
        }
    }
}

/// One executable statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stmt", rename_all = "snake_case")]
pub enum Stmt {
    Command { line: usize, command: SimCommand },
    Loop { line: usize, kind: LoopKind, body: Vec<Stmt> },
}

/// A parsed program: the top-level statements in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Program {
    statements: Vec<Stmt>,
}

impl Program {
    /// Parses source text.  Never fails: lines without a visual effect are
    /// dropped.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use stick_core::sim::program::{LoopKind, Program, Stmt};
    ///
    /// let program = Program::parse("while True:\n    lcd.clear()\n");
    /// assert!(matches!(
    ///     &program.statements()[0],
    ///     Stmt::Loop { kind: LoopKind::WhileTrue, body, .. } if body.len() == 1
    /// ));
    /// ```
    pub fn parse(source: &str) -> Self {
        let lines: Vec<(usize, &str, LineKind)> = source
            .lines()
            .enumerate()
            .map(|(i, text)| (i + 1, text, classify_line(text)))
            .collect();
        Self {
            statements: parse_block(&lines),
        }
    }

    pub fn statements(&self) -> &[Stmt] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Number of commands the program runs under `ceiling`, loops expanded.
    pub fn command_count(&self, ceiling: u32) -> u64 {
        count_commands(&self.statements, ceiling)
    }
}

fn count_commands(stmts: &[Stmt], ceiling: u32) -> u64 {
    stmts
        .iter()
        .map(|stmt| match stmt {
            Stmt::Command { .. } => 1,
            Stmt::Loop { kind, body, .. } => {
                u64::from(kind.iterations(ceiling)).saturating_mul(count_commands(body, ceiling))
            }
        })
        .fold(0u64, u64::saturating_add)
}

fn parse_block(lines: &[(usize, &str, LineKind)]) -> Vec<Stmt> {
    let mut stmts = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let (line, text, kind) = &lines[i];
        i += 1;

        let loop_kind = match kind {
            LineKind::Call(command) => {
                stmts.push(Stmt::Command {
                    line: *line,
                    command: command.clone(),
                });
                continue;
            }
            LineKind::WhileTrue => LoopKind::WhileTrue,
            LineKind::ForRange(n) => LoopKind::ForRange(*n),
            LineKind::Blank | LineKind::Comment | LineKind::Unrecognized => continue,
        };

        let end = body_end(lines, i, indentation(text));
        stmts.push(Stmt::Loop {
            line: *line,
            kind: loop_kind,
            body: parse_block(&lines[i..end]),
        });
        i = end;
    }
    stmts
}

/// Returns the exclusive end index of the body that starts at `start`.
fn body_end(lines: &[(usize, &str, LineKind)], start: usize, header_indent: usize) -> usize {
    let Some(first) = lines[start..]
        .iter()
        .position(|(_, _, kind)| !kind.is_filler())
        .map(|offset| start + offset)
    else {
        return lines.len();
    };

    let body_indent = indentation(lines[first].1);
    if body_indent <= header_indent {
        return start;
    }

    lines[first..]
        .iter()
        .position(|(_, text, kind)| !kind.is_filler() && indentation(text) < body_indent)
        .map_or(lines.len(), |offset| first + offset)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Parsing of raw-mode execution output.
//!
//! After the code buffer is submitted with Ctrl-D, the device replies with:
//!
//! ```text
//! OK<stdout>\x04<stderr>\x04>
//! ```
//!
//! `OK` acknowledges the submission, the first `\x04` ends stdout, the second
//! `\x04` ends stderr, and `>` is the raw prompt signalling the device is ready
//! for the next submission.

use serde::Serialize;
use thiserror::Error;

use crate::protocol::control::{
    OUTPUT_START_MARKER, RAW_PROMPT, SEGMENT_SEPARATOR, STDERR_SEPARATOR,
};

/// Errors that can occur while parsing execution output.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The accumulated output never contained the `OK` acknowledgement.
    #[error("execution output is missing the 'OK' start marker")]
    MissingStartMarker,
}

/// Text extracted from a single execution round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionOutput {
    /// Everything the program printed to standard output.
    pub stdout: String,
    /// Traceback or error text reported by the interpreter.
    pub stderr: String,
    /// `true` when the completion marker never arrived and this output is partial.
    pub timed_out: bool,
}

impl ExecutionOutput {
    /// Returns stdout, with stderr appended behind [`STDERR_SEPARATOR`] when non-empty.
    ///
    /// Stderr is never dropped: a learner's traceback is the most useful part of
    /// a failed run.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use stick_core::protocol::{parse_execution_output, STDERR_SEPARATOR};
    ///
    /// let out = parse_execution_output("OKhi\x04Oops\x04>").unwrap();
    /// assert_eq!(out.combined(), format!("hi{STDERR_SEPARATOR}Oops"));
    /// ```
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}{}{}", self.stdout, STDERR_SEPARATOR, self.stderr)
        }
    }

    /// Best-effort parse used when the completion marker never arrived.
    ///
    /// If the start marker is missing the whole buffer is reported as stdout,
    /// since anything the device said is diagnostically useful.
    pub fn partial(buffer: &str) -> Self {
        let mut out = match parse_execution_output(buffer) {
            Ok(out) => out,
            Err(ProtocolError::MissingStartMarker) => Self {
                stdout: buffer.to_string(),
                ..Self::default()
            },
        };
        out.timed_out = true;
        out
    }
}

/// Splits raw-mode output into stdout and stderr.
///
/// Everything before the first `OK` is ignored.  The remainder is split on
/// `\x04`: the first segment is stdout, the second stderr.  A trailing raw
/// prompt is not part of either.
///
/// # Errors
///
/// Returns [`ProtocolError::MissingStartMarker`] if `OK` does not occur.
///
/// # Examples
///
/// ```rust
/// use stick_core::protocol::parse_execution_output;
///
/// let out = parse_execution_output("OKhello\r\n\x04\x04>").unwrap();
/// assert_eq!(out.stdout, "hello\r\n");
/// assert!(out.stderr.is_empty());
/// ```
pub fn parse_execution_output(buffer: &str) -> Result<ExecutionOutput, ProtocolError> {
    let start = buffer
        .find(OUTPUT_START_MARKER)
        .ok_or(ProtocolError::MissingStartMarker)?;
    let rest = &buffer[start + OUTPUT_START_MARKER.len()..];

    let mut segments = rest.split(SEGMENT_SEPARATOR);
    let stdout = segments.next().unwrap_or_default().to_string();
    let stderr = segments.next().unwrap_or_default().to_string();

    Ok(ExecutionOutput {
        stdout,
        stderr,
        timed_out: false,
    })
}

/// Returns `true` once `buffer` holds a complete execution round.
///
/// Completion means: the `OK` marker, a first `\x04`, and later a `\x04`
/// immediately followed by the raw prompt.
pub fn is_execution_complete(buffer: &str) -> bool {
    let Some(start) = buffer.find(OUTPUT_START_MARKER) else {
        return false;
    };
    let rest = &buffer[start + OUTPUT_START_MARKER.len()..];
    let Some(first) = rest.find(SEGMENT_SEPARATOR) else {
        return false;
    };
    let tail = &rest[first + SEGMENT_SEPARATOR.len_utf8()..];
    let mut done_marker = String::with_capacity(2);
    done_marker.push(SEGMENT_SEPARATOR);
    done_marker.push(RAW_PROMPT);
    tail.contains(done_marker.as_str())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stdout_only() {
        // Arrange
        let buffer = "OK42\r\n\x04\x04>";

        // Act
        let out = parse_execution_output(buffer).unwrap();

        // Assert
        assert_eq!(out.stdout, "42\r\n");
        assert_eq!(out.stderr, "");
        assert_eq!(out.combined(), "42\r\n");
    }

    #[test]
    fn test_parse_stdout_and_stderr_are_joined_with_separator() {
        let buffer = "OKbefore\r\n\x04Traceback (most recent call last):\r\nNameError\x04>";

        let out = parse_execution_output(buffer).unwrap();

        assert_eq!(out.stdout, "before\r\n");
        assert!(out.stderr.starts_with("Traceback"));
        assert_eq!(
            out.combined(),
            format!("before\r\n{STDERR_SEPARATOR}{}", out.stderr)
        );
    }

    #[test]
    fn test_parse_ignores_noise_before_start_marker() {
        let buffer = ">\r\nraw REPL noise OKdata\x04\x04>";
        let out = parse_execution_output(buffer).unwrap();
        assert_eq!(out.stdout, "data");
    }

    #[test]
    fn test_parse_without_marker_is_error() {
        assert_eq!(
            parse_execution_output("no marker here"),
            Err(ProtocolError::MissingStartMarker)
        );
    }

    #[test]
    fn test_is_execution_complete_requires_both_separators_and_prompt() {
        assert!(!is_execution_complete(""));
        assert!(!is_execution_complete("OK"));
        assert!(!is_execution_complete("OKhello\x04"));
        assert!(!is_execution_complete("OKhello\x04err"));
        assert!(is_execution_complete("OKhello\x04err\x04>"));
        assert!(is_execution_complete("OK\x04\x04>"));
    }

    #[test]
    fn test_partial_keeps_unmarked_buffer_as_stdout() {
        // Arrange: the program printed before hanging, but no OK arrived
        let out = ExecutionOutput::partial("some text");

        // Assert
        assert_eq!(out.stdout, "some text");
        assert!(out.timed_out);
    }

    #[test]
    fn test_partial_parses_what_arrived() {
        let out = ExecutionOutput::partial("OKtick\r\ntick\r\n");
        assert_eq!(out.stdout, "tick\r\ntick\r\n");
        assert!(out.timed_out);
    }

    #[test]
    fn test_output_serializes_with_stable_field_names() {
        // Arrange
        let out = parse_execution_output("OKhi\x04Oops\x04>").unwrap();

        // Act
        let json = serde_json::to_value(&out).unwrap();

        // Assert
        assert_eq!(
            json,
            serde_json::json!({ "stdout": "hi", "stderr": "Oops", "timed_out": false })
        );
    }
}

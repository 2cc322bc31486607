//! REPL protocol engine: drives the device's interactive prompt through any
//! [`Transport`].
//!
//! # State machine
//!
//! ```text
//! Idle ──enter_raw_repl()──▶ EnteringRaw { attempt } ──banner──▶ RawReady
//!                                                                   │
//!                      execute_code(): code + Ctrl-D                 ▼
//! Idle ◀──exit_raw_repl()── ExitingRaw ◀──completion marker── Executing
//! ```
//!
//! Every public method takes `&mut self`, so the borrow checker rules out two
//! operations in flight on one engine.  A failed step resets the engine to
//! `Idle`; the caller may simply try again.
//!
//! # Capturing output (for beginners)
//!
//! The engine never replaces anybody's listener.  For each wait it takes its
//! own subscription on the transport's event hub, polls it every
//! `poll_interval` until the expected marker shows up or the deadline passes,
//! and drops the subscription afterwards.  A terminal view subscribed to the
//! same transport keeps receiving everything.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use stick_core::protocol::{
    has_raw_banner, is_execution_complete, parse_execution_output, signal, ExecutionOutput,
    CTRL_ENTER_RAW, CTRL_EXECUTE, CTRL_EXIT_RAW, CTRL_INTERRUPT, INTERRUPT_BURST, LINE_TERMINATOR,
};

use crate::application::transport::{Transport, TransportError, TransportEvent};

/// Errors surfaced by the REPL engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplError {
    #[error("not connected to a device")]
    NotConnected,

    #[error("device did not enter raw REPL mode after {attempts} attempts")]
    RawModeTimeout { attempts: u32 },

    #[error("device disconnected during the operation")]
    Disconnected,

    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for ReplError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotConnected => ReplError::NotConnected,
            other => ReplError::Transport(other),
        }
    }
}

impl ReplError {
    /// What the user can do about it.
    pub fn hint(&self) -> &'static str {
        match self {
            ReplError::NotConnected => "Connect to the device first.",
            ReplError::RawModeTimeout { .. } => {
                "Is firmware running? Press the device's reset button and try again."
            }
            ReplError::Disconnected => "The device went away; check the cable or WiFi and reconnect.",
            ReplError::Transport(e) => e.hint(),
        }
    }
}

/// Where the engine is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplState {
    Idle,
    EnteringRaw { attempt: u32 },
    RawReady,
    Executing,
    ExitingRaw,
}

/// Every delay, deadline and retry count the engine uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplTimings {
    /// Ctrl-C signals per interrupt burst.
    pub interrupt_count: usize,
    /// Pause after each Ctrl-C in a burst.
    #[serde(with = "crate::application::millis")]
    pub interrupt_gap: Duration,
    /// Pause after exit-raw and soft-reset signals.
    #[serde(with = "crate::application::millis")]
    pub settle: Duration,
    /// How long to wait for the raw-mode banner per attempt.
    #[serde(with = "crate::application::millis")]
    pub raw_entry_timeout: Duration,
    /// Escalated retries after the first raw-mode attempt.
    pub max_raw_retries: u32,
    /// Wait after a soft reset for the interpreter to reboot.
    #[serde(with = "crate::application::millis")]
    pub reboot_wait: Duration,
    /// Pause between submitted code lines.
    #[serde(with = "crate::application::millis")]
    pub line_delay: Duration,
    /// How long to wait for the completion marker after Ctrl-D.
    #[serde(with = "crate::application::millis")]
    pub exec_timeout: Duration,
    /// How often a wait re-checks captured output.
    #[serde(with = "crate::application::millis")]
    pub poll_interval: Duration,
}

impl Default for ReplTimings {
    fn default() -> Self {
        Self {
            interrupt_count: INTERRUPT_BURST,
            interrupt_gap: Duration::from_millis(100),
            settle: Duration::from_millis(100),
            raw_entry_timeout: Duration::from_millis(2000),
            max_raw_retries: 3,
            reboot_wait: Duration::from_millis(1500),
            line_delay: Duration::from_millis(10),
            exec_timeout: Duration::from_millis(10_000),
            poll_interval: Duration::from_millis(20),
        }
    }
}

/// Speaks the MicroPython REPL control protocol over a transport.
pub struct ReplEngine<T: Transport + ?Sized> {
    transport: Arc<T>,
    timings: ReplTimings,
    state: ReplState,
}

impl<T: Transport + ?Sized> ReplEngine<T> {
    pub fn new(transport: Arc<T>, timings: ReplTimings) -> Self {
        Self {
            transport,
            timings,
            state: ReplState::Idle,
        }
    }

    pub fn state(&self) -> ReplState {
        self.state
    }

    pub fn timings(&self) -> &ReplTimings {
        &self.timings
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Puts the device into raw mode, escalating to a soft reset if needed.
    ///
    /// # Errors
    ///
    /// [`ReplError::NotConnected`] without writing anything if the transport
    /// is down; [`ReplError::RawModeTimeout`] once every retry failed.
    pub async fn enter_raw_repl(&mut self) -> Result<(), ReplError> {
        self.guard()?;
        let result = self.enter_raw_inner().await;
        self.settle_state(&result, ReplState::RawReady);
        result
    }

    /// Leaves raw mode.
    ///
    /// # Errors
    ///
    /// [`ReplError::NotConnected`] if the transport is down.
    pub async fn exit_raw_repl(&mut self) -> Result<(), ReplError> {
        self.guard()?;
        self.state = ReplState::ExitingRaw;
        let result = self.exit_raw_inner().await;
        self.state = ReplState::Idle;
        result
    }

    /// Runs `code` on the device and returns what it printed.
    ///
    /// If the completion marker does not arrive within `exec_timeout`, the
    /// running program is interrupted and whatever arrived is returned with
    /// `timed_out` set.
    ///
    /// # Errors
    ///
    /// [`ReplError::NotConnected`], [`ReplError::RawModeTimeout`],
    /// [`ReplError::Disconnected`] or a transport write failure.
    pub async fn execute_code(&mut self, code: &str) -> Result<ExecutionOutput, ReplError> {
        self.guard()?;
        let result = self.execute_inner(code).await;
        self.settle_state(&result, ReplState::Idle);
        result
    }

    /// Stops a running program: one interrupt burst, then a line terminator.
    ///
    /// # Errors
    ///
    /// [`ReplError::NotConnected`] if the transport is down.
    pub async fn interrupt(&mut self) -> Result<(), ReplError> {
        self.guard()?;
        info!("interrupting device");
        let result = self.interrupt_sequence().await;
        self.state = ReplState::Idle;
        result
    }

    /// Soft-resets the interpreter: interrupt, exit raw mode, Ctrl-D.
    ///
    /// # Errors
    ///
    /// [`ReplError::NotConnected`] if the transport is down.
    pub async fn soft_reset(&mut self) -> Result<(), ReplError> {
        self.guard()?;
        info!("soft-resetting device");
        let result = self.soft_reset_inner().await;
        self.state = ReplState::Idle;
        result
    }

    // ── Sequences ─────────────────────────────────────────────────────────────

    async fn enter_raw_inner(&mut self) -> Result<(), ReplError> {
        let attempts = self.timings.max_raw_retries + 1;

        for attempt in 0..attempts {
            self.state = ReplState::EnteringRaw { attempt };
            let mut capture = self.transport.subscribe();

            if attempt == 0 {
                debug!("entering raw REPL");
                self.interrupt_burst().await?;
            } else {
                warn!(attempt, "raw REPL banner missing, escalating to soft reset");
                self.send_signal(CTRL_EXIT_RAW).await?;
                self.interrupt_burst().await?;
                self.send_signal(CTRL_EXECUTE).await?;
                sleep(self.timings.reboot_wait).await;
                self.interrupt_burst().await?;
            }
            self.transport.write(LINE_TERMINATOR).await?;
            self.send_signal(CTRL_ENTER_RAW).await?;

            let mut buffer = String::new();
            if self
                .wait_for(&mut capture, &mut buffer, self.timings.raw_entry_timeout, has_raw_banner)
                .await?
            {
                info!(attempt, "raw REPL ready");
                return Ok(());
            }
        }

        Err(ReplError::RawModeTimeout { attempts })
    }

    async fn exit_raw_inner(&self) -> Result<(), ReplError> {
        self.send_signal(CTRL_EXIT_RAW).await?;
        sleep(self.timings.settle).await;
        Ok(())
    }

    async fn execute_inner(&mut self, code: &str) -> Result<ExecutionOutput, ReplError> {
        self.enter_raw_inner().await?;
        self.state = ReplState::Executing;

        let mut capture = self.transport.subscribe();
        let line_count = code.lines().count();
        debug!(lines = line_count, "submitting code");
        for line in code.lines() {
            self.transport.write(&format!("{line}\n")).await?;
            sleep(self.timings.line_delay).await;
        }
        self.send_signal(CTRL_EXECUTE).await?;

        let mut buffer = String::new();
        let complete = self
            .wait_for(&mut capture, &mut buffer, self.timings.exec_timeout, is_execution_complete)
            .await?;
        drop(capture);

        let output = if complete {
            parse_execution_output(&buffer).unwrap_or_else(|_| ExecutionOutput::partial(&buffer))
        } else {
            warn!(
                timeout_ms = self.timings.exec_timeout.as_millis() as u64,
                "execution did not complete; returning partial output"
            );
            self.interrupt_burst().await?;
            ExecutionOutput::partial(&buffer)
        };

        self.state = ReplState::ExitingRaw;
        self.exit_raw_inner().await?;
        info!(
            stdout_len = output.stdout.len(),
            stderr_len = output.stderr.len(),
            timed_out = output.timed_out,
            "execution finished"
        );
        Ok(output)
    }

    async fn interrupt_sequence(&self) -> Result<(), ReplError> {
        self.interrupt_burst().await?;
        self.transport.write(LINE_TERMINATOR).await?;
        Ok(())
    }

    async fn soft_reset_inner(&self) -> Result<(), ReplError> {
        self.interrupt_sequence().await?;
        sleep(self.timings.settle).await;
        self.send_signal(CTRL_EXIT_RAW).await?;
        sleep(self.timings.settle).await;
        self.send_signal(CTRL_EXECUTE).await?;
        sleep(self.timings.settle).await;
        Ok(())
    }

    async fn interrupt_burst(&self) -> Result<(), ReplError> {
        for _ in 0..self.timings.interrupt_count {
            self.send_signal(CTRL_INTERRUPT).await?;
            sleep(self.timings.interrupt_gap).await;
        }
        Ok(())
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn guard(&self) -> Result<(), ReplError> {
        if self.transport.is_connected() {
            Ok(())
        } else {
            Err(ReplError::NotConnected)
        }
    }

    fn settle_state<V>(&mut self, result: &Result<V, ReplError>, on_success: ReplState) {
        self.state = match result {
            Ok(_) => on_success,
            Err(_) => ReplState::Idle,
        };
    }

    async fn send_signal(&self, byte: u8) -> Result<(), ReplError> {
        self.transport.write_bytes(&signal(byte)).await?;
        Ok(())
    }

    /// Accumulates received text into `buffer` until `done(buffer)` holds.
    ///
    /// Returns `Ok(false)` when `timeout` elapses first.
    async fn wait_for(
        &self,
        capture: &mut broadcast::Receiver<TransportEvent>,
        buffer: &mut String,
        timeout: Duration,
        done: fn(&str) -> bool,
    ) -> Result<bool, ReplError> {
        let deadline = Instant::now() + timeout;
        loop {
            loop {
                match capture.try_recv() {
                    Ok(TransportEvent::Data(text)) => buffer.push_str(&text),
                    Ok(TransportEvent::Disconnected) | Err(TryRecvError::Closed) => {
                        return Err(ReplError::Disconnected)
                    }
                    Ok(TransportEvent::Connected | TransportEvent::Error(_)) => {}
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!(skipped, "output capture lagged; some device output was lost");
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }
            if done(buffer.as_str()) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(self.timings.poll_interval).await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings_use_four_interrupts() {
        let t = ReplTimings::default();
        assert_eq!(t.interrupt_count, 4);
        assert!(t.reboot_wait > t.settle);
    }

    #[test]
    fn test_not_connected_transport_error_maps_to_not_connected() {
        assert_eq!(
            ReplError::from(TransportError::NotConnected),
            ReplError::NotConnected
        );
        assert_eq!(
            ReplError::from(TransportError::AuthFailed),
            ReplError::Transport(TransportError::AuthFailed)
        );
    }

    #[test]
    fn test_timings_round_trip_through_toml_as_millis() {
        // Arrange
        let timings = ReplTimings {
            exec_timeout: Duration::from_millis(2500),
            ..ReplTimings::default()
        };

        // Act
        let text = toml::to_string(&timings).unwrap();
        let restored: ReplTimings = toml::from_str(&text).unwrap();

        // Assert
        assert!(text.contains("exec_timeout = 2500"));
        assert_eq!(restored, timings);
    }

    #[test]
    fn test_partial_timings_table_keeps_defaults() {
        let t: ReplTimings = toml::from_str("max_raw_retries = 1").unwrap();
        assert_eq!(t.max_raw_retries, 1);
        assert_eq!(t.interrupt_count, 4);
    }
}

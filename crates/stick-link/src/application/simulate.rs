//! Bounded simulator runner: replays a [`Program`] on a [`Canvas`].
//!
//! # Why the simulator always terminates (for beginners)
//!
//! A learner's `while True:` would hang a naive interpreter.  Here every loop
//! runs at most `iteration_ceiling` times: `while True` runs exactly that
//! many iterations and `for i in range(n)` runs `min(n, ceiling)`.  Sleeps and
//! tones pause for at most `max_sleep`.  With no unbounded loop and no
//! unbounded wait, every run ends.
//!
//! # Cancellation
//!
//! Each run owns a `CancellationToken`.  Starting a new run cancels the
//! previous token and waits `teardown_grace` before drawing anything.  The
//! token is checked before every command, at every loop iteration and inside
//! every sleep, so a cancelled run draws nothing after the cutover.  A
//! cancelled run reports [`RunOutcome::Cancelled`]; it is not an error.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use uuid::Uuid;

use stick_core::{Canvas, Program, SimCommand, Stmt};

/// Genuine runtime faults.  Unrecognized code and cancellation are not errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("the display canvas is unusable after an earlier drawing failure")]
    CanvasPoisoned,
}

/// Limits applied to every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Maximum iterations of any single loop.
    pub iteration_ceiling: u32,
    /// Longest pause a sleep or tone may cause.
    #[serde(with = "crate::application::millis")]
    pub max_sleep: Duration,
    /// Pause between cancelling a previous run and starting the next.
    #[serde(with = "crate::application::millis")]
    pub teardown_grace: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            iteration_ceiling: 100,
            max_sleep: Duration::from_secs(3),
            teardown_grace: Duration::from_millis(20),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// Stopped on purpose, by [`Simulator::cancel`] or a newer run.
    Cancelled,
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    /// Commands applied to the canvas, sleeps included.
    pub commands_executed: u64,
    /// Loop entries cut short by the iteration ceiling.
    pub truncated_loops: u32,
}

impl RunReport {
    pub fn was_truncated(&self) -> bool {
        self.truncated_loops > 0
    }
}

/// Called with `(frequency_hz, duration_ms)` for every tone.
pub type ToneCallback = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// Canvas shared between the simulator and whoever displays it.
pub type SharedCanvas = Arc<Mutex<dyn Canvas>>;

enum Halt {
    Cancelled,
    Fault(SimError),
}

struct RunState {
    token: CancellationToken,
    commands_executed: u64,
    truncated_loops: u32,
}

/// Runs programs against a canvas, one run at a time.
pub struct Simulator {
    config: SimulatorConfig,
    canvas: SharedCanvas,
    on_tone: Option<ToneCallback>,
    active: Mutex<ActiveRun>,
}

/// The token of the run in progress, tagged with its start order.
#[derive(Default)]
struct ActiveRun {
    generation: u64,
    token: Option<CancellationToken>,
}

impl Simulator {
    pub fn new(config: SimulatorConfig, canvas: SharedCanvas) -> Self {
        Self {
            config,
            canvas,
            on_tone: None,
            active: Mutex::new(ActiveRun::default()),
        }
    }

    /// Registers the tone callback.
    pub fn with_tone_callback(mut self, on_tone: ToneCallback) -> Self {
        self.on_tone = Some(on_tone);
        self
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn canvas(&self) -> &SharedCanvas {
        &self.canvas
    }

    /// Cancels the run in progress, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.lock_active().token.take() {
            token.cancel();
        }
    }

    /// Parses and runs `source`, cancelling any run already in progress.
    ///
    /// # Errors
    ///
    /// [`SimError`] only for genuine faults; a cancelled run returns
    /// `Ok` with [`RunOutcome::Cancelled`].
    pub async fn run(&self, source: &str) -> Result<RunReport, SimError> {
        let program = Program::parse(source);
        self.run_program(&program).await
    }

    /// Runs an already parsed program; see [`Simulator::run`].
    ///
    /// # Errors
    ///
    /// See [`Simulator::run`].
    pub async fn run_program(&self, program: &Program) -> Result<RunReport, SimError> {
        let run_id = Uuid::new_v4();
        let token = CancellationToken::new();
        let (generation, previous) = {
            let mut active = self.lock_active();
            active.generation += 1;
            (active.generation, active.token.replace(token.clone()))
        };

        if let Some(previous) = previous {
            debug!(%run_id, "cancelling previous run");
            previous.cancel();
            sleep(self.config.teardown_grace).await;
        }

        info!(
            %run_id,
            statements = program.statements().len(),
            ceiling = self.config.iteration_ceiling,
            "simulation started"
        );

        let mut state = RunState {
            token: token.clone(),
            commands_executed: 0,
            truncated_loops: 0,
        };
        let halt = self.exec_block(program.statements(), &mut state).await.err();

        {
            let mut active = self.lock_active();
            if active.generation == generation {
                active.token = None;
            }
        }

        let outcome = match halt {
            None => RunOutcome::Completed,
            Some(Halt::Cancelled) => RunOutcome::Cancelled,
            Some(Halt::Fault(e)) => return Err(e),
        };
        let report = RunReport {
            run_id,
            outcome,
            commands_executed: state.commands_executed,
            truncated_loops: state.truncated_loops,
        };
        info!(
            %run_id,
            ?outcome,
            commands = report.commands_executed,
            truncated_loops = report.truncated_loops,
            "simulation finished"
        );
        Ok(report)
    }

    fn exec_block<'a>(
        &'a self,
        stmts: &'a [Stmt],
        state: &'a mut RunState,
    ) -> BoxFuture<'a, Result<(), Halt>> {
        async move {
            for stmt in stmts {
                match stmt {
                    Stmt::Command { command, line } => {
                        self.exec_command(command, *line, state).await?;
                    }
                    Stmt::Loop { kind, body, line } => {
                        let ceiling = self.config.iteration_ceiling;
                        if kind.is_truncated(ceiling) {
                            state.truncated_loops += 1;
                        }
                        trace!(line, ?kind, iterations = kind.iterations(ceiling), "loop");
                        for _ in 0..kind.iterations(ceiling) {
                            check(&state.token)?;
                            self.exec_block(body, state).await?;
                            tokio::task::yield_now().await;
                        }
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }

    async fn exec_command(
        &self,
        command: &SimCommand,
        line: usize,
        state: &mut RunState,
    ) -> Result<(), Halt> {
        check(&state.token)?;
        trace!(line, command = command.name(), "command");
        {
            let mut canvas = self
                .canvas
                .lock()
                .map_err(|_| Halt::Fault(SimError::CanvasPoisoned))?;
            command.render(&mut *canvas);
        }
        state.commands_executed += 1;

        if let (SimCommand::Tone { frequency_hz, duration_ms }, Some(on_tone)) = (command, &self.on_tone) {
            on_tone(*frequency_hz, *duration_ms);
        }
        if let Some(pause) = command.pause() {
            self.pause(pause, &state.token).await?;
        }
        Ok(())
    }

    async fn pause(&self, requested: Duration, token: &CancellationToken) -> Result<(), Halt> {
        let capped = requested.min(self.config.max_sleep);
        tokio::select! {
            _ = token.cancelled() => Err(Halt::Cancelled),
            _ = sleep(capped) => Ok(()),
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, ActiveRun> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check(token: &CancellationToken) -> Result<(), Halt> {
    if token.is_cancelled() {
        Err(Halt::Cancelled)
    } else {
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

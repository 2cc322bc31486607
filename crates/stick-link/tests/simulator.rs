//! Integration tests for the bounded simulator runner.
//!
//! Programs run against a `RecordingCanvas` so assertions can look at the
//! exact calls issued.  Sleeps are real but tiny, capped by `max_sleep`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use stick_core::{Canvas, DisplaySurface, Rgb};
use stick_link::application::simulate::{
    RunOutcome, SharedCanvas, Simulator, SimulatorConfig, ToneCallback,
};
use stick_link::infrastructure::mock::{CanvasCall, RecordingCanvas};

fn config(ceiling: u32) -> SimulatorConfig {
    SimulatorConfig {
        iteration_ceiling: ceiling,
        max_sleep: Duration::from_millis(5),
        teardown_grace: Duration::from_millis(5),
    }
}

fn recording_simulator(ceiling: u32) -> (Arc<Mutex<RecordingCanvas>>, Simulator) {
    let canvas = Arc::new(Mutex::new(RecordingCanvas::new()));
    let shared: SharedCanvas = canvas.clone();
    (canvas, Simulator::new(config(ceiling), shared))
}

fn text_calls(canvas: &Arc<Mutex<RecordingCanvas>>) -> usize {
    canvas.lock().unwrap().texts().len()
}

// ── Loop bounds ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_while_true_runs_exactly_the_ceiling() {
    // Arrange
    let (canvas, simulator) = recording_simulator(200);
    let src = "while True:\n    lcd.print('hi', 0, 0)\n";

    // Act
    let report = simulator.run(src).await.unwrap();

    // Assert
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(text_calls(&canvas), 200);
    assert_eq!(report.commands_executed, 200);
    assert!(report.was_truncated());
}

#[tokio::test]
async fn test_for_range_runs_min_of_count_and_ceiling() {
    let (short_canvas, short) = recording_simulator(100);
    let (long_canvas, long) = recording_simulator(100);

    let short_report = short.run("for i in range(7):\n    lcd.print('x', 0, 0)\n").await.unwrap();
    let long_report = long.run("for i in range(500):\n    lcd.print('x', 0, 0)\n").await.unwrap();

    assert_eq!(text_calls(&short_canvas), 7);
    assert!(!short_report.was_truncated());
    assert_eq!(text_calls(&long_canvas), 100);
    assert_eq!(long_report.truncated_loops, 1);
}

#[tokio::test]
async fn test_nested_loops_multiply_iterations() {
    let (canvas, simulator) = recording_simulator(100);
    let src = "\
for i in range(3):
    for j in range(4):
        lcd.pixel(1, 2)
";

    simulator.run(src).await.unwrap();

    let pixels = canvas
        .lock()
        .unwrap()
        .calls
        .iter()
        .filter(|c| matches!(c, CanvasCall::Pixel { .. }))
        .count();
    assert_eq!(pixels, 12);
}

// ── Ordering and rendering ────────────────────────────────────────────────────

#[tokio::test]
async fn test_clear_then_two_texts_render_in_order() {
    // Arrange
    let (canvas, simulator) = recording_simulator(100);
    let src = "\
lcd.clear(lcd.BLACK)
lcd.print('Hello', 10, 10)
# a comment in between
lcd.print('World', 10, 30, lcd.RED)
";

    // Act
    simulator.run(src).await.unwrap();

    // Assert
    let canvas = canvas.lock().unwrap();
    assert_eq!(canvas.calls.len(), 3);
    assert_eq!(canvas.calls[0], CanvasCall::Clear(Some(Rgb::BLACK)));
    assert_eq!(canvas.texts(), vec!["Hello", "World"]);
    assert_eq!(canvas.snapshot().texts, vec!["Hello".to_string(), "World".to_string()]);
}

#[tokio::test]
async fn test_unrecognized_lines_are_skipped() {
    let (canvas, simulator) = recording_simulator(100);
    let src = "\
import time
score = 3
print('not on the screen')
lcd.print('shown', 0, 0)
";

    let report = simulator.run(src).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(canvas.lock().unwrap().texts(), vec!["shown"]);
}

#[tokio::test]
async fn test_real_surface_keeps_background_and_snapshot() {
    // Arrange
    let surface = Arc::new(Mutex::new(DisplaySurface::new()));
    let shared: SharedCanvas = surface.clone();
    let simulator = Simulator::new(config(100), shared);

    // Act
    simulator
        .run("lcd.fillScreen(0x001F)\nlcd.print('Score', 0, 0)\n")
        .await
        .unwrap();

    // Assert
    let surface = surface.lock().unwrap();
    assert_eq!(surface.background(), Rgb::new(0, 0, 0xFF));
    assert!(surface.snapshot().contains_text("Score"));
}

// ── Sound ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tone_invokes_callback_and_marks_snapshot() {
    // Arrange
    let heard = Arc::new(Mutex::new(Vec::new()));
    let on_tone: ToneCallback = {
        let heard = Arc::clone(&heard);
        Arc::new(move |frequency_hz: u32, duration_ms: u32| {
            heard.lock().unwrap().push((frequency_hz, duration_ms));
        })
    };
    let canvas = Arc::new(Mutex::new(RecordingCanvas::new()));
    let shared: SharedCanvas = canvas.clone();
    let simulator = Simulator::new(config(100), shared).with_tone_callback(on_tone);

    // Act
    simulator.run("speaker.tone(440, 200)\n").await.unwrap();

    // Assert
    assert_eq!(*heard.lock().unwrap(), vec![(440, 200)]);
    assert!(canvas.lock().unwrap().snapshot().sound_produced);
}

#[tokio::test]
async fn test_long_sleep_is_capped() {
    // Arrange: a ten-second sleep against a 5 ms cap
    let (_canvas, simulator) = recording_simulator(100);

    // Act
    let started = tokio::time::Instant::now();
    let report = simulator.run("time.sleep(10)\n").await.unwrap();

    // Assert
    assert_eq!(report.commands_executed, 1);
    assert!(started.elapsed() < Duration::from_secs(2));
}

// ── Cancellation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cancel_stops_a_running_program() {
    // Arrange: 100 iterations of a 5 ms sleep would take half a second
    let (canvas, simulator) = recording_simulator(100);
    let simulator = Arc::new(simulator);
    let src = "while True:\n    lcd.print('x', 0, 0)\n    time.sleep_ms(50)\n";

    let canceller = {
        let simulator = Arc::clone(&simulator);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            simulator.cancel();
        })
    };

    // Act
    let report = simulator.run(src).await.unwrap();
    canceller.await.unwrap();

    // Assert
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert!(text_calls(&canvas) < 100);
}

#[tokio::test]
async fn test_new_run_cancels_previous_and_owns_the_canvas() {
    // Arrange
    let (canvas, simulator) = recording_simulator(100);
    let simulator = Arc::new(simulator);
    let old_src = "while True:\n    lcd.print('old', 0, 0)\n    time.sleep_ms(50)\n";
    let new_src = "lcd.print('new', 0, 0)\n";

    let first = {
        let simulator = Arc::clone(&simulator);
        tokio::spawn(async move { simulator.run(old_src).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Act
    let second = simulator.run(new_src).await.unwrap();
    let first = first.await.unwrap().unwrap();

    // Assert: nothing from the old run lands after the new run's first draw
    assert_eq!(first.outcome, RunOutcome::Cancelled);
    assert_eq!(second.outcome, RunOutcome::Completed);
    let texts: Vec<String> = canvas
        .lock()
        .unwrap()
        .texts()
        .into_iter()
        .map(str::to_string)
        .collect();
    let new_at = texts.iter().position(|t| t == "new").unwrap();
    assert!(texts[new_at..].iter().all(|t| t == "new"));
}

#[tokio::test]
async fn test_cancel_without_run_is_noop() {
    let (_canvas, simulator) = recording_simulator(100);
    simulator.cancel();
    let report = simulator.run("lcd.print('ok', 0, 0)\n").await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
}

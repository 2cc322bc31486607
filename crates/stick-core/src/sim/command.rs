//! The closed set of device calls the simulator understands.

use std::time::Duration;

use serde::Serialize;

use crate::display::{color::Rgb, surface::Canvas};

/// One recognized device call with typed arguments.
///
/// A `None` color means the call did not pass one; the canvas picks its
/// default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimCommand {
    Clear {
        color: Option<Rgb>,
    },
    Text {
        text: String,
        x: i32,
        y: i32,
        color: Option<Rgb>,
    },
    Rect {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        color: Option<Rgb>,
        filled: bool,
    },
    Circle {
        x: i32,
        y: i32,
        radius: i32,
        color: Option<Rgb>,
        filled: bool,
    },
    Line {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        color: Option<Rgb>,
    },
    Pixel {
        x: i32,
        y: i32,
        color: Option<Rgb>,
    },
    SetTextColor {
        color: Rgb,
    },
    SetTextSize {
        size: u32,
    },
    Sleep {
        ms: u64,
    },
    Tone {
        frequency_hz: u32,
        duration_ms: u32,
    },
}

impl SimCommand {
    /// Applies the visible part of the command to `canvas`.
    ///
    /// `Sleep` draws nothing.  `Tone` only marks the snapshot; playing the
    /// sound and pausing are the runner's job.
    pub fn render(&self, canvas: &mut dyn Canvas) {
        match self {
            SimCommand::Clear { color } => canvas.clear(*color),
            SimCommand::Text { text, x, y, color } => canvas.draw_text(*x, *y, text, *color),
            SimCommand::Rect {
                x,
                y,
                width,
                height,
                color,
                filled,
            } => canvas.draw_rect(*x, *y, *width, *height, *color, *filled),
            SimCommand::Circle {
                x,
                y,
                radius,
                color,
                filled,
            } => canvas.draw_circle(*x, *y, *radius, *color, *filled),
            SimCommand::Line {
                x1,
                y1,
                x2,
                y2,
                color,
            } => canvas.draw_line(*x1, *y1, *x2, *y2, *color),
            SimCommand::Pixel { x, y, color } => canvas.draw_pixel(*x, *y, *color),
            SimCommand::SetTextColor { color } => canvas.set_text_color(*color),
            SimCommand::SetTextSize { size } => canvas.set_text_size(*size),
            SimCommand::Sleep { .. } => {}
            SimCommand::Tone {
                frequency_hz,
                duration_ms,
            } => canvas.record_tone(*frequency_hz, *duration_ms),
        }
    }

    /// How long the program asked to pause after this command, uncapped.
    pub fn pause(&self) -> Option<Duration> {
        match self {
            SimCommand::Sleep { ms } => Some(Duration::from_millis(*ms)),
            SimCommand::Tone { duration_ms, .. } => Some(Duration::from_millis(u64::from(*duration_ms))),
            _ => None,
        }
    }

    /// Short lowercase name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            SimCommand::Clear { .. } => "clear",
            SimCommand::Text { .. } => "text",
            SimCommand::Rect { .. } => "rect",
            SimCommand::Circle { .. } => "circle",
            SimCommand::Line { .. } => "line",
            SimCommand::Pixel { .. } => "pixel",
            SimCommand::SetTextColor { .. } => "set_text_color",
            SimCommand::SetTextSize { .. } => "set_text_size",
            SimCommand::Sleep { .. } => "sleep",
            SimCommand::Tone { .. } => "tone",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::surface::DisplaySurface;

    #[test]
    fn test_sleep_and_tone_report_pause() {
        assert_eq!(
            SimCommand::Sleep { ms: 250 }.pause(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            SimCommand::Tone {
                frequency_hz: 440,
                duration_ms: 100
            }
            .pause(),
            Some(Duration::from_millis(100))
        );
        assert_eq!(SimCommand::Clear { color: None }.pause(), None);
    }

    #[test]
    fn test_render_tone_marks_snapshot_without_drawing() {
        let mut surface = DisplaySurface::new();
        SimCommand::Tone {
            frequency_hz: 880,
            duration_ms: 50,
        }
        .render(&mut surface);

        assert!(surface.snapshot().sound_produced);
        assert!(surface.pixels().iter().all(|&p| p == Rgb::BLACK));
    }

    #[test]
    fn test_render_text_uses_canvas() {
        let mut surface = DisplaySurface::new();
        SimCommand::Text {
            text: "Hello".to_string(),
            x: 0,
            y: 0,
            color: None,
        }
        .render(&mut surface);

        assert!(surface.snapshot().contains_text("Hello"));
    }
}

//! The 135×240 display surface and the output snapshot.
//!
//! [`DisplaySurface`] is the only component that rasterises pixels.  The
//! simulator never touches pixels directly: it calls the [`Canvas`] trait, so
//! tests can substitute a recording canvas and assert on the exact sequence of
//! primitive calls.
//!
//! # Output snapshot
//!
//! Lesson validation does not inspect pixels.  It reads the [`OutputSnapshot`]:
//! every distinct string drawn, plus whether any tone was played.  The
//! snapshot is cumulative and is only reset by [`Canvas::clear_snapshot`];
//! clearing the screen does not clear it.

use std::convert::Infallible;

use embedded_graphics::{
    mono_font::{ascii::FONT_6X10, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Line, PrimitiveStyle, Rectangle},
    text::{Baseline, Text},
};
use serde::Serialize;

use crate::display::color::Rgb;

/// Width of the device display in pixels.
pub const DISPLAY_WIDTH: u32 = 135;

/// Height of the device display in pixels.
pub const DISPLAY_HEIGHT: u32 = 240;

/// Smallest text-size multiplier the device accepts.
pub const MIN_TEXT_SIZE: u32 = 1;

/// Largest text-size multiplier the device accepts.
pub const MAX_TEXT_SIZE: u32 = 7;

/// Visible effects accumulated across one or more simulator runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutputSnapshot {
    /// Distinct drawn strings, in the order they first appeared.
    pub texts: Vec<String>,
    /// `true` once any tone has been requested.
    pub sound_produced: bool,
}

impl OutputSnapshot {
    /// Records a drawn string unless it was already seen.
    pub fn record_text(&mut self, text: &str) {
        if !self.texts.iter().any(|t| t == text) {
            self.texts.push(text.to_string());
        }
    }

    /// Returns `true` if `text` was drawn at least once.
    pub fn contains_text(&self, text: &str) -> bool {
        self.texts.iter().any(|t| t == text)
    }

    /// Forgets everything recorded so far.
    pub fn clear(&mut self) {
        self.texts.clear();
        self.sound_produced = false;
    }
}

/// Primitive drawing operations the simulator issues.
///
/// A `None` color means "use the surface default": the current text color for
/// text, white for shapes, black for a clear.
pub trait Canvas: Send {
    /// Fills the whole screen and makes `color` the new background.
    fn clear(&mut self, color: Option<Rgb>);

    /// Draws `text` with its top-left corner at (`x`, `y`).
    fn draw_text(&mut self, x: i32, y: i32, text: &str, color: Option<Rgb>);

    /// Draws a rectangle, filled or outlined.
    fn draw_rect(&mut self, x: i32, y: i32, width: i32, height: i32, color: Option<Rgb>, filled: bool);

    /// Draws a circle centred on (`x`, `y`), filled or outlined.
    fn draw_circle(&mut self, x: i32, y: i32, radius: i32, color: Option<Rgb>, filled: bool);

    /// Draws a one-pixel line between two points.
    fn draw_line(&mut self, x1: i32, y1: i32, x2: i32, y2: i32, color: Option<Rgb>);

    /// Sets a single pixel.
    fn draw_pixel(&mut self, x: i32, y: i32, color: Option<Rgb>);

    /// Changes the default text color.
    fn set_text_color(&mut self, color: Rgb);

    /// Changes the text-size multiplier.  Implementations clamp to 1–7.
    fn set_text_size(&mut self, size: u32);

    /// Notes that a tone was requested.
    fn record_tone(&mut self, frequency_hz: u32, duration_ms: u32);

    /// Returns a copy of the accumulated snapshot.
    fn snapshot(&self) -> OutputSnapshot;

    /// Resets the accumulated snapshot.
    fn clear_snapshot(&mut self);
}

/// In-memory model of the device display.
#[derive(Debug, Clone)]
pub struct DisplaySurface {
    pixels: Vec<Rgb>,
    background: Rgb,
    text_color: Rgb,
    text_size: u32,
    snapshot: OutputSnapshot,
}

impl Default for DisplaySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySurface {
    /// Creates a black surface with white size-1 text.
    pub fn new() -> Self {
        Self {
            pixels: vec![Rgb::BLACK; (DISPLAY_WIDTH * DISPLAY_HEIGHT) as usize],
            background: Rgb::BLACK,
            text_color: Rgb::WHITE,
            text_size: MIN_TEXT_SIZE,
            snapshot: OutputSnapshot::default(),
        }
    }

    /// Returns the color at (`x`, `y`), or `None` outside the surface.
    pub fn pixel(&self, x: i32, y: i32) -> Option<Rgb> {
        Self::index(i64::from(x), i64::from(y)).map(|i| self.pixels[i])
    }

    pub fn background(&self) -> Rgb {
        self.background
    }

    pub fn text_color(&self) -> Rgb {
        self.text_color
    }

    pub fn text_size(&self) -> u32 {
        self.text_size
    }

    /// Returns the row-major pixel buffer.
    pub fn pixels(&self) -> &[Rgb] {
        &self.pixels
    }

    fn index(x: i64, y: i64) -> Option<usize> {
        let in_bounds = (0..i64::from(DISPLAY_WIDTH)).contains(&x) && (0..i64::from(DISPLAY_HEIGHT)).contains(&y);
        in_bounds.then(|| (y as u32 * DISPLAY_WIDTH + x as u32) as usize)
    }

    fn put(&mut self, x: i64, y: i64, color: Rgb) {
        if let Some(i) = Self::index(x, y) {
            self.pixels[i] = color;
        }
    }

    /// Fills the inclusive box `(x0, y0)..=(x1, y1)` after clamping it to the
    /// screen, so the work never exceeds the visible area.
    fn fill_clamped(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb) {
        let x0 = x0.max(0);
        let y0 = y0.max(0);
        let x1 = x1.min(i64::from(DISPLAY_WIDTH) - 1);
        let y1 = y1.min(i64::from(DISPLAY_HEIGHT) - 1);
        if x0 > x1 || y0 > y1 {
            return;
        }
        let area = Rectangle::with_corners(Point::new(x0 as i32, y0 as i32), Point::new(x1 as i32, y1 as i32));
        let _ = self.fill_solid(&area, color.into());
    }

    /// Fills the circle rows that intersect the screen.
    ///
    /// A pixel belongs to the disc when its squared distance from the centre is
    /// at most `r² + r`; an outline keeps only the pixels outside the disc of
    /// radius `r - 1`.
    fn fill_circle_rows(&mut self, cx: i64, cy: i64, radius: i64, color: Rgb, filled: bool) {
        let outer = radius * radius + radius;
        let inner = (radius - 1) * (radius - 1) + (radius - 1);
        let top = (cy - radius).max(0);
        let bottom = (cy + radius).min(i64::from(DISPLAY_HEIGHT) - 1);
        for y in top..=bottom {
            let dy2 = (y - cy) * (y - cy);
            let Some(half) = isqrt(outer - dy2) else {
                continue;
            };
            match isqrt(inner - dy2).filter(|_| !filled && radius > 0) {
                Some(hole) => {
                    self.fill_clamped(cx - half, y, cx - hole - 1, y, color);
                    self.fill_clamped(cx + hole + 1, y, cx + half, y, color);
                }
                None => self.fill_clamped(cx - half, y, cx + half, y, color),
            }
        }
    }
}

/// Integer square root, `None` for negative input.
fn isqrt(n: i64) -> Option<i64> {
    if n < 0 {
        return None;
    }
    let mut r = (n as f64).sqrt() as i64;
    while r * r > n {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= n {
        r += 1;
    }
    Some(r)
}

/// Clips a segment to the screen (Liang–Barsky).  `None` when nothing of it is
/// visible.
fn clip_line(x1: i32, y1: i32, x2: i32, y2: i32) -> Option<(Point, Point)> {
    let (x1, y1) = (f64::from(x1), f64::from(y1));
    let (dx, dy) = (f64::from(x2) - x1, f64::from(y2) - y1);
    let x_max = f64::from(DISPLAY_WIDTH - 1);
    let y_max = f64::from(DISPLAY_HEIGHT - 1);

    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    for (p, q) in [(-dx, x1), (dx, x_max - x1), (-dy, y1), (dy, y_max - y1)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    let at = |t: f64| Point::new((x1 + t * dx).round() as i32, (y1 + t * dy).round() as i32);
    Some((at(t0), at(t1)))
}

impl OriginDimensions for DisplaySurface {
    fn size(&self) -> Size {
        Size::new(DISPLAY_WIDTH, DISPLAY_HEIGHT)
    }
}

impl DrawTarget for DisplaySurface {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            self.put(i64::from(point.x), i64::from(point.y), color.into());
        }
        Ok(())
    }
}

/// Draw target that magnifies every pixel into a `scale`×`scale` block.
///
/// The device scales its base font by the text-size multiplier; this adapter
/// does the same for the 6×10 mono font.
struct ScaledTarget<'a> {
    surface: &'a mut DisplaySurface,
    origin: Point,
    scale: i32,
}

impl OriginDimensions for ScaledTarget<'_> {
    fn size(&self) -> Size {
        Size::new(DISPLAY_WIDTH, DISPLAY_HEIGHT)
    }
}

impl DrawTarget for ScaledTarget<'_> {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            let base_x = i64::from(self.origin.x) + i64::from(point.x * self.scale);
            let base_y = i64::from(self.origin.y) + i64::from(point.y * self.scale);
            for dy in 0..self.scale {
                for dx in 0..self.scale {
                    self.surface.put(base_x + i64::from(dx), base_y + i64::from(dy), color.into());
                }
            }
        }
        Ok(())
    }
}

impl Canvas for DisplaySurface {
    fn clear(&mut self, color: Option<Rgb>) {
        let color = color.unwrap_or(Rgb::BLACK);
        self.background = color;
        self.pixels.fill(color);
    }

    fn draw_text(&mut self, x: i32, y: i32, text: &str, color: Option<Rgb>) {
        self.snapshot.record_text(text);
        let style = MonoTextStyle::new(&FONT_6X10, color.unwrap_or(self.text_color).into());
        let scale = self.text_size as i32;
        let mut target = ScaledTarget {
            surface: self,
            origin: Point::new(x, y),
            scale,
        };
        let _ = Text::with_baseline(text, Point::zero(), style, Baseline::Top).draw(&mut target);
    }

    fn draw_rect(&mut self, x: i32, y: i32, width: i32, height: i32, color: Option<Rgb>, filled: bool) {
        if width <= 0 || height <= 0 {
            return;
        }
        let color = color.unwrap_or(Rgb::WHITE);
        let (left, top) = (i64::from(x), i64::from(y));
        let right = left + i64::from(width) - 1;
        let bottom = top + i64::from(height) - 1;
        if filled {
            self.fill_clamped(left, top, right, bottom, color);
        } else {
            self.fill_clamped(left, top, right, top, color);
            self.fill_clamped(left, bottom, right, bottom, color);
            self.fill_clamped(left, top, left, bottom, color);
            self.fill_clamped(right, top, right, bottom, color);
        }
    }

    fn draw_circle(&mut self, x: i32, y: i32, radius: i32, color: Option<Rgb>, filled: bool) {
        if radius < 0 {
            return;
        }
        let color = color.unwrap_or(Rgb::WHITE);
        self.fill_circle_rows(i64::from(x), i64::from(y), i64::from(radius), color, filled);
    }

    fn draw_line(&mut self, x1: i32, y1: i32, x2: i32, y2: i32, color: Option<Rgb>) {
        let Some((start, end)) = clip_line(x1, y1, x2, y2) else {
            return;
        };
        let style = PrimitiveStyle::with_stroke(color.unwrap_or(Rgb::WHITE).into(), 1);
        let _ = Line::new(start, end).into_styled(style).draw(self);
    }

    fn draw_pixel(&mut self, x: i32, y: i32, color: Option<Rgb>) {
        self.put(i64::from(x), i64::from(y), color.unwrap_or(Rgb::WHITE));
    }

    fn set_text_color(&mut self, color: Rgb) {
        self.text_color = color;
    }

    fn set_text_size(&mut self, size: u32) {
        self.text_size = size.clamp(MIN_TEXT_SIZE, MAX_TEXT_SIZE);
    }

    fn record_tone(&mut self, _frequency_hz: u32, _duration_ms: u32) {
        self.snapshot.sound_produced = true;
    }

    fn snapshot(&self) -> OutputSnapshot {
        self.snapshot.clone()
    }

    fn clear_snapshot(&mut self) {
        self.snapshot.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Raster display model shared by the simulator.
//!
//! # What is modelled?
//!
//! The target device has a 135×240 pixel color LCD.  Programs draw on it with
//! a small vocabulary of primitives (fill, stroke, text, line, point).  This
//! module provides:
//!
//! - **`color`** – one pure function that turns any textual color reference
//!   (named constant, packed 16-bit value, CSS-style literal) into an [`Rgb`].
//! - **`surface`** – the [`DisplaySurface`] pixel buffer, the [`Canvas`] trait
//!   the simulator draws through, and the [`OutputSnapshot`] read back by
//!   lesson validation.
//!
//! Pixels are rasterised with `embedded-graphics`, the same primitives and
//! mono fonts an on-device display driver would use.

pub mod color;
pub mod surface;

pub use color::{resolve_color, Rgb};
pub use surface::{Canvas, DisplaySurface, OutputSnapshot, DISPLAY_HEIGHT, DISPLAY_WIDTH};

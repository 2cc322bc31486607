//! Color resolution.
//!
//! Programs reference colors in several ways:
//!
//! | Form                 | Example                         |
//! |----------------------|---------------------------------|
//! | Named constant       | `RED`, `lcd.RED`, `TFT_RED`     |
//! | Packed hex           | `0xF800` (RGB565), `0xFF0000`   |
//! | Packed decimal       | `63488`                         |
//! | Display literal      | `#ff0000`, `#f00`, `rgb(255,0,0)` |
//!
//! [`resolve_color`] tries them in exactly that order and falls back to white,
//! so it is a total function: it never fails and never panics.

use std::fmt;

use embedded_graphics::pixelcolor::{Rgb888, RgbColor};
use serde::{Serialize, Serializer};

/// A resolved 24-bit display color.
///
/// The canonical display string is `#RRGGBB` with uppercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(0xFF, 0xFF, 0xFF);

    /// Creates a color from its three channels.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Expands a packed RGB565 value to 24 bits.
    ///
    /// Bit replication maps the channel maxima (31/63/31) to 255 exactly.
    ///
    /// ```rust
    /// use stick_core::Rgb;
    ///
    /// assert_eq!(Rgb::from_rgb565(0xF800), Rgb::new(0xFF, 0, 0));
    /// assert_eq!(Rgb::from_rgb565(0xFFFF), Rgb::WHITE);
    /// ```
    pub const fn from_rgb565(packed: u16) -> Self {
        let r5 = ((packed >> 11) & 0x1F) as u8;
        let g6 = ((packed >> 5) & 0x3F) as u8;
        let b5 = (packed & 0x1F) as u8;
        Self {
            r: (r5 << 3) | (r5 >> 2),
            g: (g6 << 2) | (g6 >> 4),
            b: (b5 << 3) | (b5 >> 2),
        }
    }

    /// Creates a color from a packed `0xRRGGBB` value.
    pub const fn from_rgb888(packed: u32) -> Self {
        Self {
            r: ((packed >> 16) & 0xFF) as u8,
            g: ((packed >> 8) & 0xFF) as u8,
            b: (packed & 0xFF) as u8,
        }
    }

    /// Returns the canonical `#RRGGBB` display string.
    pub fn to_css(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl Serialize for Rgb {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<Rgb> for Rgb888 {
    fn from(c: Rgb) -> Self {
        Rgb888::new(c.r, c.g, c.b)
    }
}

impl From<Rgb888> for Rgb {
    fn from(c: Rgb888) -> Self {
        Rgb::new(c.r(), c.g(), c.b())
    }
}

// ── Named constants ───────────────────────────────────────────────────────────

struct NamedColor {
    name: &'static str,
    /// The RGB565 value the device firmware defines for this name.
    packed: u16,
    /// Canonical display value.  Not always the bit-expanded `packed`.
    rgb: Rgb,
}

const fn named(name: &'static str, packed: u16, rgb: u32) -> NamedColor {
    NamedColor {
        name,
        packed,
        rgb: Rgb::from_rgb888(rgb),
    }
}

/// Symbol table of the device's display library.
const NAMED_COLORS: &[NamedColor] = &[
    named("BLACK", 0x0000, 0x000000),
    named("NAVY", 0x000F, 0x000080),
    named("DARKGREEN", 0x03E0, 0x008000),
    named("DARKCYAN", 0x03EF, 0x008080),
    named("MAROON", 0x7800, 0x800000),
    named("PURPLE", 0x780F, 0x800080),
    named("OLIVE", 0x7BE0, 0x808000),
    named("LIGHTGREY", 0xD69A, 0xD3D3D3),
    named("DARKGREY", 0x7BEF, 0x808080),
    named("BLUE", 0x001F, 0x0000FF),
    named("GREEN", 0x07E0, 0x00FF00),
    named("CYAN", 0x07FF, 0x00FFFF),
    named("RED", 0xF800, 0xFF0000),
    named("MAGENTA", 0xF81F, 0xFF00FF),
    named("YELLOW", 0xFFE0, 0xFFFF00),
    named("WHITE", 0xFFFF, 0xFFFFFF),
    named("ORANGE", 0xFDA0, 0xFFB400),
    named("GREENYELLOW", 0xB7E0, 0xB4FF00),
    named("PINK", 0xFE19, 0xFFC0CB),
];

// ── Resolution ────────────────────────────────────────────────────────────────

/// Resolves a textual color reference to a display color.
///
/// Resolution order: named constant, packed hex, packed decimal, display
/// literal, then [`Rgb::WHITE`].
///
/// # Examples
///
/// ```rust
/// use stick_core::{resolve_color, Rgb};
///
/// assert_eq!(resolve_color("lcd.RED"), resolve_color("0xF800"));
/// assert_eq!(resolve_color("63488").to_css(), "#FF0000");
/// assert_eq!(resolve_color("not a color"), Rgb::WHITE);
/// ```
pub fn resolve_color(reference: &str) -> Rgb {
    let cleaned = reference
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim();

    lookup_named(cleaned)
        .or_else(|| lookup_packed_hex(cleaned))
        .or_else(|| lookup_packed_decimal(cleaned))
        .or_else(|| parse_literal(cleaned))
        .unwrap_or(Rgb::WHITE)
}

/// Looks a name up in the symbol table, ignoring any `namespace.` qualifier,
/// a `TFT_` prefix, and letter case.
fn lookup_named(reference: &str) -> Option<Rgb> {
    let symbol = reference.rsplit('.').next().unwrap_or(reference);
    let upper = symbol.to_ascii_uppercase();
    let bare = upper.strip_prefix("TFT_").unwrap_or(&upper);
    NAMED_COLORS
        .iter()
        .find(|c| c.name == bare)
        .map(|c| c.rgb)
}

fn lookup_packed_hex(reference: &str) -> Option<Rgb> {
    let digits = reference
        .strip_prefix("0x")
        .or_else(|| reference.strip_prefix("0X"))?;
    let value = u32::from_str_radix(digits, 16).ok()?;
    packed_to_rgb(value)
}

fn lookup_packed_decimal(reference: &str) -> Option<Rgb> {
    if reference.is_empty() || !reference.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u32 = reference.parse().ok()?;
    packed_to_rgb(value)
}

/// Maps a packed integer to a color.
///
/// Values the symbol table knows resolve to the same canonical color as their
/// name.  Other 16-bit values are expanded from RGB565; wider values up to
/// 24 bits are read as `0xRRGGBB`.
fn packed_to_rgb(value: u32) -> Option<Rgb> {
    if let Ok(packed) = u16::try_from(value) {
        let known = NAMED_COLORS.iter().find(|c| c.packed == packed);
        return Some(known.map_or_else(|| Rgb::from_rgb565(packed), |c| c.rgb));
    }
    (value <= 0xFF_FFFF).then(|| Rgb::from_rgb888(value))
}

fn parse_literal(reference: &str) -> Option<Rgb> {
    if let Some(hex) = reference.strip_prefix('#') {
        return parse_css_hex(hex);
    }
    let lower = reference.to_ascii_lowercase();
    let inner = lower.strip_prefix("rgb(")?.strip_suffix(')')?;
    let channels: Vec<u8> = inner
        .split(',')
        .map(|part| part.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .ok()?;
    match channels.as_slice() {
        [r, g, b] => Some(Rgb::new(*r, *g, *b)),
        _ => None,
    }
}

fn parse_css_hex(hex: &str) -> Option<Rgb> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        6 => u32::from_str_radix(hex, 16).ok().map(Rgb::from_rgb888),
        3 => {
            // #RGB is shorthand for #RRGGBB.
            let v = u32::from_str_radix(hex, 16).ok()?;
            let expand = |n: u32| ((n & 0xF) * 0x11) as u8;
            Some(Rgb::new(expand(v >> 8), expand(v >> 4), expand(v)))
        }
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

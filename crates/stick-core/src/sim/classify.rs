//! Line classifier: turns one source line into a loop header, a typed
//! [`SimCommand`], or nothing.
//!
//! # How matching works (for beginners)
//!
//! Learner programs contain plenty of Python the simulator does not model:
//! imports, variables, `if` statements, function definitions.  Those lines are
//! classified as [`LineKind::Unrecognized`] and skipped; they are never an
//! error.
//!
//! A device call has the shape `namespace.method(arg, arg, ...)`.  The method
//! name is looked up in [`CALL_RULES`], an ordered table of
//! `(method names, builder)` entries.  The first entry listing the name wins,
//! and its builder converts the argument strings into a [`SimCommand`].  A
//! builder returns `None` when the arguments are not literals it can use
//! (e.g. `lcd.print(name, x, 10)`), which also makes the line a no-op.
//!
//! Display calls must carry a namespace (`lcd.print(...)`), so Python's own
//! `print("debug")` is not mistaken for drawing.  Sleeps may be bare, to cover
//! `from time import sleep_ms`.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::trace;

use crate::display::color::{resolve_color, Rgb};
use crate::sim::command::SimCommand;

/// Classification of a single source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LineKind {
    Blank,
    Comment,
    /// `while True:`, `while 1:`, or `while (True):`.
    WhileTrue,
    /// `for <var> in range(...)` with the requested iteration count.
    ForRange(u32),
    Call(SimCommand),
    Unrecognized,
}

impl LineKind {
    /// Returns `true` for lines that never affect block structure.
    pub fn is_filler(&self) -> bool {
        matches!(self, LineKind::Blank | LineKind::Comment)
    }
}

/// Builds a command from the split argument list, or `None` if unusable.
type Builder = fn(&[&str]) -> Option<SimCommand>;

/// One entry of the recognized-call table.
pub struct CallRule {
    /// Method names this rule answers to.
    pub methods: &'static [&'static str],
    /// Whether the call is recognized without a `namespace.` prefix.
    pub bare_allowed: bool,
    build: Builder,
}

/// Recognized calls, in priority order.
pub static CALL_RULES: &[CallRule] = &[
    CallRule {
        methods: &["fillScreen", "clear", "fill"],
        bare_allowed: false,
        build: build_clear,
    },
    CallRule {
        methods: &["drawString", "print", "text"],
        bare_allowed: false,
        build: build_text,
    },
    CallRule {
        methods: &["fillRect", "fill_rect"],
        bare_allowed: false,
        build: build_fill_rect,
    },
    CallRule {
        methods: &["drawRect", "rect"],
        bare_allowed: false,
        build: build_draw_rect,
    },
    CallRule {
        methods: &["fillCircle", "fill_circle"],
        bare_allowed: false,
        build: build_fill_circle,
    },
    CallRule {
        methods: &["drawCircle", "circle"],
        bare_allowed: false,
        build: build_draw_circle,
    },
    CallRule {
        methods: &["drawLine", "line"],
        bare_allowed: false,
        build: build_line,
    },
    CallRule {
        methods: &["drawPixel", "pixel"],
        bare_allowed: false,
        build: build_pixel,
    },
    CallRule {
        methods: &["setTextColor", "set_text_color"],
        bare_allowed: false,
        build: build_text_color,
    },
    CallRule {
        methods: &["setTextSize", "set_text_size"],
        bare_allowed: false,
        build: build_text_size,
    },
    CallRule {
        methods: &["sleep_ms", "wait_ms"],
        bare_allowed: true,
        build: build_sleep_ms,
    },
    CallRule {
        methods: &["sleep", "wait"],
        bare_allowed: true,
        build: build_sleep_seconds,
    },
    CallRule {
        methods: &["tone"],
        bare_allowed: false,
        build: build_tone,
    },
];

static CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([A-Za-z_][\w.]*)\.)?([A-Za-z_]\w*)\s*\((.*)\)$").expect("Invalid call Regex")
});

static WHILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^while\s*(?:True|1|\(\s*(?:True|1)\s*\))\s*:$").expect("Invalid while Regex")
});

static FOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^for\s+[A-Za-z_]\w*\s+in\s+range\s*\(\s*(-?\d+)\s*(?:,\s*(-?\d+)\s*)?\)\s*:$")
        .expect("Invalid for Regex")
});

/// Classifies one line of source text.
///
/// # Examples
///
/// ```rust
/// use stick_core::sim::classify::{classify_line, LineKind};
///
/// assert_eq!(classify_line("while True:"), LineKind::WhileTrue);
/// assert_eq!(classify_line("  for i in range(5):"), LineKind::ForRange(5));
/// assert_eq!(classify_line("score = 0"), LineKind::Unrecognized);
/// ```
pub fn classify_line(line: &str) -> LineKind {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    if trimmed.starts_with('#') {
        return LineKind::Comment;
    }
    let code = strip_comment(trimmed).trim_end();

    if WHILE_RE.is_match(code) {
        return LineKind::WhileTrue;
    }
    if let Some(caps) = FOR_RE.captures(code) {
        return range_count(caps.get(1).map(|m| m.as_str()), caps.get(2).map(|m| m.as_str()))
            .map_or(LineKind::Unrecognized, LineKind::ForRange);
    }
    match match_call(code) {
        Some(command) => LineKind::Call(command),
        None => {
            trace!(line = code, "line not modelled by the simulator");
            LineKind::Unrecognized
        }
    }
}

/// Returns the number of leading whitespace columns; a tab counts as four.
pub fn indentation(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// Splits a call's argument text on top-level commas.
///
/// Commas inside quotes or nested parentheses/brackets do not split.
///
/// ```rust
/// use stick_core::sim::classify::split_args;
///
/// assert_eq!(split_args(r#""a, b", f(1, 2), 3"#), vec![r#""a, b""#, "f(1, 2)", "3"]);
/// assert!(split_args("  ").is_empty());
/// ```
pub fn split_args(args: &str) -> Vec<&str> {
    if args.trim().is_empty() {
        return Vec::new();
    }
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in args.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(args[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(args[start..].trim());
    parts
}

fn match_call(code: &str) -> Option<SimCommand> {
    let caps = CALL_RE.captures(code)?;
    let namespaced = caps.get(1).is_some();
    let method = caps.get(2)?.as_str();
    let args = split_args(caps.get(3)?.as_str());

    let rule = CALL_RULES.iter().find(|r| r.methods.contains(&method))?;
    if !namespaced && !rule.bare_allowed {
        return None;
    }
    (rule.build)(&args)
}

/// Drops a trailing `# comment` that is not inside a string literal.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, c) in line.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '#' => return &line[..i],
            None => {}
        }
    }
    line
}

fn range_count(first: Option<&str>, second: Option<&str>) -> Option<u32> {
    let first: i64 = first?.parse().ok()?;
    let count = match second {
        Some(stop) => stop.parse::<i64>().ok()? - first,
        None => first,
    };
    Some(count.clamp(0, i64::from(u32::MAX)) as u32)
}

// ── Argument helpers ──────────────────────────────────────────────────────────

fn int_arg(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<i32>() {
        return Some(v);
    }
    let v = raw.parse::<f64>().ok()?;
    v.is_finite().then(|| v.trunc() as i32)
}

fn text_arg(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let raw = raw.strip_prefix(['f', 'F']).filter(|r| r.starts_with(['"', '\''])).unwrap_or(raw);
    for q in ['"', '\''] {
        if let Some(inner) = raw.strip_prefix(q).and_then(|r| r.strip_suffix(q)) {
            return Some(inner.to_string());
        }
    }
    // Bare numbers are printed as-is.
    raw.parse::<f64>().is_ok().then(|| raw.to_string())
}

fn color_arg(args: &[&str], index: usize) -> Option<Rgb> {
    args.get(index).filter(|a| !a.is_empty()).map(|a| resolve_color(a))
}

fn ints<const N: usize>(args: &[&str]) -> Option<[i32; N]> {
    if args.len() < N {
        return None;
    }
    let mut out = [0; N];
    for (slot, raw) in out.iter_mut().zip(args) {
        *slot = int_arg(raw)?;
    }
    Some(out)
}

// ── Builders ──────────────────────────────────────────────────────────────────

fn build_clear(args: &[&str]) -> Option<SimCommand> {
    Some(SimCommand::Clear {
        color: color_arg(args, 0),
    })
}

fn build_text(args: &[&str]) -> Option<SimCommand> {
    let text = text_arg(args.first()?)?;
    let [x, y] = match args.len() {
        1 => [0, 0],
        _ => ints::<2>(&args[1..])?,
    };
    Some(SimCommand::Text {
        text,
        x,
        y,
        color: color_arg(args, 3),
    })
}

fn build_fill_rect(args: &[&str]) -> Option<SimCommand> {
    build_rect(args, true)
}

fn build_draw_rect(args: &[&str]) -> Option<SimCommand> {
    build_rect(args, false)
}

fn build_rect(args: &[&str], filled: bool) -> Option<SimCommand> {
    let [x, y, width, height] = ints::<4>(args)?;
    Some(SimCommand::Rect {
        x,
        y,
        width,
        height,
        color: color_arg(args, 4),
        filled,
    })
}

fn build_fill_circle(args: &[&str]) -> Option<SimCommand> {
    build_circle(args, true)
}

fn build_draw_circle(args: &[&str]) -> Option<SimCommand> {
    build_circle(args, false)
}

fn build_circle(args: &[&str], filled: bool) -> Option<SimCommand> {
    let [x, y, radius] = ints::<3>(args)?;
    Some(SimCommand::Circle {
        x,
        y,
        radius,
        color: color_arg(args, 3),
        filled,
    })
}

fn build_line(args: &[&str]) -> Option<SimCommand> {
    let [x1, y1, x2, y2] = ints::<4>(args)?;
    Some(SimCommand::Line {
        x1,
        y1,
        x2,
        y2,
        color: color_arg(args, 4),
    })
}

fn build_pixel(args: &[&str]) -> Option<SimCommand> {
    let [x, y] = ints::<2>(args)?;
    Some(SimCommand::Pixel {
        x,
        y,
        color: color_arg(args, 2),
    })
}

fn build_text_color(args: &[&str]) -> Option<SimCommand> {
    Some(SimCommand::SetTextColor {
        color: color_arg(args, 0)?,
    })
}

fn build_text_size(args: &[&str]) -> Option<SimCommand> {
    let [size] = ints::<1>(args)?;
    Some(SimCommand::SetTextSize {
        size: size.max(0) as u32,
    })
}

fn build_sleep_ms(args: &[&str]) -> Option<SimCommand> {
    let ms = args.first()?.trim().parse::<f64>().ok()?;
    millis(ms)
}

fn build_sleep_seconds(args: &[&str]) -> Option<SimCommand> {
    let secs = args.first()?.trim().parse::<f64>().ok()?;
    millis(secs * 1000.0)
}

fn millis(ms: f64) -> Option<SimCommand> {
    ms.is_finite().then(|| SimCommand::Sleep {
        ms: ms.max(0.0).round() as u64,
    })
}

fn build_tone(args: &[&str]) -> Option<SimCommand> {
    let [frequency_hz, duration_ms] = ints::<2>(args)?;
    Some(SimCommand::Tone {
        frequency_hz: frequency_hz.max(0) as u32,
        duration_ms: duration_ms.max(0) as u32,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

use super::convert::{Oklab, Oklch};
use super::Color;

/// Parse any CSS color value into a [`Color`].
///
/// Handles hex (`#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa`), `rgb()`/`rgba()`
/// in both comma and space syntax, `hsl()`/`hsla()`, `oklch()`/`oklab()` and
/// named colors. `transparent` is fully transparent black.
/// Returns `None` for `currentColor`, CSS-wide keywords and anything
/// unrecognized.
pub fn parse_color(value: &str) -> Option<Color> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    let lower = trimmed.to_ascii_lowercase();
    match lower.as_str() {
        "currentcolor" | "inherit" | "initial" | "unset" | "revert" | "none" => return None,
        "transparent" => return Some(Color::TRANSPARENT),
        _ => {}
    }

    if let Some(raw) = lower.strip_prefix('#') {
        return parse_hex(raw);
    }

    if let Some(color) = parse_ok_function(&lower) {
        return Some(color);
    }

    // Remaining functional and named notations
    match csscolorparser::parse(&lower) {
        Ok(c) => {
            let [r, g, b, _] = c.to_rgba8();
            Some(Color::rgba(r, g, b, c.a as f64))
        }
        Err(_) => None,
    }
}

fn parse_hex(raw: &str) -> Option<Color> {
    if !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let nibble = |i: usize| u8::from_str_radix(&raw[i..i + 1], 16).ok().map(|v| v * 17);
    let byte = |i: usize| u8::from_str_radix(&raw[i..i + 2], 16).ok();

    match raw.len() {
        3 => Some(Color::rgb(nibble(0)?, nibble(1)?, nibble(2)?)),
        4 => Some(Color::rgba(
            nibble(0)?,
            nibble(1)?,
            nibble(2)?,
            nibble(3)? as f64 / 255.0,
        )),
        6 => Some(Color::rgb(byte(0)?, byte(2)?, byte(4)?)),
        8 => Some(Color::rgba(
            byte(0)?,
            byte(2)?,
            byte(4)?,
            byte(6)? as f64 / 255.0,
        )),
        _ => None,
    }
}

/// `oklab(L a b [/ A])` and `oklch(L C H [/ A])`, converted through our own
/// OKLab math so both directions share one implementation.
fn parse_ok_function(value: &str) -> Option<Color> {
    let (is_lch, inner) = if let Some(rest) = value.strip_prefix("oklch(") {
        (true, rest)
    } else if let Some(rest) = value.strip_prefix("oklab(") {
        (false, rest)
    } else {
        return None;
    };
    let inner = inner.strip_suffix(')')?;

    let (channels, alpha) = match inner.split_once('/') {
        Some((c, a)) => (c, Some(a.trim())),
        None => (inner, None),
    };
    let parts: Vec<&str> = channels.split_whitespace().collect();
    if parts.len() != 3 {
        return None;
    }

    let l = parse_number(parts[0], 1.0)?;
    let alpha = match alpha {
        Some(a) => parse_number(a, 1.0)?,
        None => 1.0,
    };

    let color = if is_lch {
        let c = parse_number(parts[1], 0.4)?;
        let h = parse_number(parts[2].trim_end_matches("deg"), 360.0)?;
        Oklch { l, c, h }.to_color(alpha)
    } else {
        let a = parse_number(parts[1], 0.4)?;
        let b = parse_number(parts[2], 0.4)?;
        Oklab { l, a, b }.to_color(alpha)
    };
    Some(color)
}

/// A plain number, `none` (zero), or a percentage of `percent_base`.
fn parse_number(token: &str, percent_base: f64) -> Option<f64> {
    if token == "none" {
        return Some(0.0);
    }
    match token.strip_suffix('%') {
        Some(pct) => pct.parse::<f64>().ok().map(|v| v / 100.0 * percent_base),
        None => token.parse::<f64>().ok(),
    }
    .filter(|v| v.is_finite())
}

/// Format as lowercase `#rrggbb`, or `#rrggbbaa` when not fully opaque.
pub fn to_hex(color: Color) -> String {
    if color.is_opaque() {
        format!("#{:02x}{:02x}{:02x}", color.r, color.g, color.b)
    } else {
        format!(
            "#{:02x}{:02x}{:02x}{:02x}",
            color.r,
            color.g,
            color.b,
            color.alpha8()
        )
    }
}

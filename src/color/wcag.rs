use serde::{Deserialize, Serialize};

use super::Color;

/// Minimum contrast for user interface components and graphical objects (SC 1.4.11).
pub const UI_COMPONENT_MIN_RATIO: f64 = 3.0;

/// Contrast conformance target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ContrastLevel {
    #[default]
    AA,
    AAA,
}

/// Convert one sRGB channel (0-255) to linear light.
/// WCAG 2.x definition: V/12.92 below 0.03928, ((V+0.055)/1.055)^2.4 above.
fn channel_to_linear(channel: u8) -> f64 {
    let v = channel as f64 / 255.0;
    if v <= 0.03928 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

/// Relative luminance per WCAG 2.1, in `[0, 1]`. Alpha is ignored; blend first.
/// L = 0.2126 * R + 0.7152 * G + 0.0722 * B (linear channels)
pub fn relative_luminance(color: Color) -> f64 {
    0.2126 * channel_to_linear(color.r)
        + 0.7152 * channel_to_linear(color.g)
        + 0.0722 * channel_to_linear(color.b)
}

/// WCAG contrast ratio in `[1, 21]`, symmetric in its arguments.
/// ratio = (L1 + 0.05) / (L2 + 0.05) where L1 >= L2
pub fn contrast_ratio(a: Color, b: Color) -> f64 {
    ratio_from_luminance(relative_luminance(a), relative_luminance(b))
}

pub(crate) fn ratio_from_luminance(l1: f64, l2: f64) -> f64 {
    let (lighter, darker) = if l1 >= l2 { (l1, l2) } else { (l2, l1) };
    (lighter + 0.05) / (darker + 0.05)
}

/// Alpha-composite `fg` over `bg` (Porter-Duff "over", straight alpha).
///
/// An opaque foreground is returned unchanged. The result is opaque whenever
/// `bg` is opaque.
pub fn alpha_blend(fg: Color, bg: Color) -> Color {
    if fg.is_opaque() {
        return fg;
    }

    let fa = fg.a;
    let ba = bg.a;
    let out_a = fa + ba * (1.0 - fa);
    if out_a <= 0.0 {
        return Color::TRANSPARENT;
    }

    let blend = |f: u8, b: u8| -> u8 {
        let v = (f as f64 * fa + b as f64 * ba * (1.0 - fa)) / out_a;
        v.round().clamp(0.0, 255.0) as u8
    };

    Color::rgba(
        blend(fg.r, bg.r),
        blend(fg.g, bg.g),
        blend(fg.b, bg.b),
        out_a,
    )
}

/// Minimum ratio for a level: AA 4.5 (large 3.0), AAA 7.0 (large 4.5).
pub fn required_ratio(level: ContrastLevel, is_large_text: bool) -> f64 {
    match (level, is_large_text) {
        (ContrastLevel::AA, false) => 4.5,
        (ContrastLevel::AA, true) => 3.0,
        (ContrastLevel::AAA, false) => 7.0,
        (ContrastLevel::AAA, true) => 4.5,
    }
}

pub fn meets_level(ratio: f64, level: ContrastLevel, is_large_text: bool) -> bool {
    ratio >= required_ratio(level, is_large_text)
}

/// Large text per WCAG: at least 24px, or at least 18.66px (14pt) and bold.
pub fn is_large_text(font_size_px: f64, font_weight: u16) -> bool {
    font_size_px >= 24.0 || (font_size_px >= 18.66 && font_weight >= 700)
}

//! Color and contrast math.
//!
//! Pure functions over [`Color`] plus a three-tier memo cache:
//! - **parse**: normalized string → color
//! - **luminance**: quantized RGB → relative luminance
//! - **contrast**: ordered RGB pair → contrast ratio
//!
//! Cache entries never change for a given key, so the caches are only ever
//! invalidated wholesale.

pub mod cache;
pub mod convert;
pub mod parse;
pub mod simulate;
pub mod wcag;

pub use cache::{CacheConfig, CacheStats, ColorCache};
pub use convert::{Hsl, Oklab, Oklch};
pub use parse::{parse_color, to_hex};
pub use simulate::{simulate, Deficiency};
pub use wcag::{
    alpha_blend, contrast_ratio, meets_level, relative_luminance, required_ratio, ContrastLevel,
    UI_COMPONENT_MIN_RATIO,
};

use serde::{Deserialize, Serialize};

/// An sRGB color with straight (non-premultiplied) alpha.
///
/// Channels are 0-255 by construction; alpha is clamped to 0.0-1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: f64,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const TRANSPARENT: Color = Color {
        r: 0,
        g: 0,
        b: 0,
        a: 0.0,
    };

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b, a: 1.0 }
    }

    pub fn rgba(r: u8, g: u8, b: u8, a: f64) -> Self {
        let a = if a.is_nan() { 1.0 } else { a.clamp(0.0, 1.0) };
        Color { r, g, b, a }
    }

    /// Alpha quantized to 8 bits, the precision every cache key uses.
    pub fn alpha8(&self) -> u8 {
        (self.a * 255.0).round() as u8
    }

    pub fn is_opaque(&self) -> bool {
        self.alpha8() == 255
    }

    pub fn is_transparent(&self) -> bool {
        self.alpha8() == 0
    }

    /// Packed `0xRRGGBB`, ignoring alpha.
    pub fn rgb_key(&self) -> u32 {
        (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }

    /// Packed `0xRRGGBBAA` with quantized alpha.
    pub fn rgba_key(&self) -> u32 {
        self.rgb_key() << 8 | self.alpha8() as u32
    }

    /// Same color, fully opaque.
    pub fn opaque(&self) -> Color {
        Color::rgb(self.r, self.g, self.b)
    }

    /// Same color with alpha multiplied by `factor` (element opacity).
    pub fn with_opacity(&self, factor: f64) -> Color {
        Color::rgba(self.r, self.g, self.b, self.a * factor)
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&to_hex(*self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba_clamps_alpha() {
        assert_eq!(Color::rgba(1, 2, 3, 1.7).a, 1.0);
        assert_eq!(Color::rgba(1, 2, 3, -0.2).a, 0.0);
        assert_eq!(Color::rgba(1, 2, 3, f64::NAN).a, 1.0);
    }

    #[test]
    fn test_keys() {
        let c = Color::rgba(0x12, 0x34, 0x56, 1.0);
        assert_eq!(c.rgb_key(), 0x123456);
        assert_eq!(c.rgba_key(), 0x123456ff);
        assert!(c.is_opaque());
        assert!(Color::TRANSPARENT.is_transparent());
    }
}

//! Property tests for color parsing and contrast math.
//!
//! Tests verify:
//! - Contrast ratio symmetry and bounds
//! - Cached and uncached contrast agree
//! - Malformed colors fail without panicking

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sweep::color::{contrast_ratio, parse_color, to_hex, Color, ColorCache};

fn random_colors(n: usize, seed: u64) -> Vec<Color> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| Color::rgb(rng.gen(), rng.gen(), rng.gen()))
        .collect()
}

// ============================================================================
// CONTRAST PROPERTIES
// ============================================================================

#[test]
fn test_contrast_symmetric() {
    let colors = random_colors(200, 7);
    for pair in colors.chunks(2) {
        let (a, b) = (pair[0], pair[1]);
        assert!((contrast_ratio(a, b) - contrast_ratio(b, a)).abs() < 1e-9);
    }
}

#[test]
fn test_contrast_bounds() {
    let colors = random_colors(200, 11);
    for pair in colors.chunks(2) {
        let ratio = contrast_ratio(pair[0], pair[1]);
        assert!((1.0..=21.0).contains(&ratio), "ratio {} out of range", ratio);
    }
    assert!((contrast_ratio(Color::BLACK, Color::WHITE) - 21.0).abs() < 1e-9);
}

#[test]
fn test_identical_colors_have_unit_contrast() {
    for c in random_colors(50, 13) {
        assert!((contrast_ratio(c, c) - 1.0).abs() < 1e-9);
    }
}

#[test]
fn test_cache_matches_direct_computation() {
    let cache = ColorCache::default();
    let colors = random_colors(100, 17);
    for pair in colors.chunks(2) {
        let direct = contrast_ratio(pair[0], pair[1]);
        // Second lookup is a hit and must return the same value
        assert!((cache.contrast(pair[0], pair[1]) - direct).abs() < 1e-9);
        assert!((cache.contrast(pair[1], pair[0]) - direct).abs() < 1e-9);
    }

    let stats = cache.stats();
    assert!(stats.contrast.hits >= 50);
}

// ============================================================================
// PARSING
// ============================================================================

#[test]
fn test_hex_roundtrip_for_random_colors() {
    for c in random_colors(200_000, 19) {
        assert_eq!(parse_color(&to_hex(c)), Some(c));
    }
}

#[test]
fn test_hex_strings_survive_parse_and_format() {
    let mut rng = StdRng::seed_from_u64(23);
    for _ in 0..200_000 {
        let value: u32 = rng.gen_range(0..1 << 24);
        let hex = format!("#{:06x}", value);
        let parsed = parse_color(&hex).unwrap();
        assert_eq!(to_hex(parsed), hex);

        // Upper case input normalizes to the same lower case output
        let upper = format!("#{:06X}", value);
        assert_eq!(parse_color(&upper), Some(parsed));
    }

    for hex in ["#000000", "#ffffff", "#0000ff", "#ff0000"] {
        assert_eq!(to_hex(parse_color(hex).unwrap()), hex);
    }
}

#[test]
fn test_malformed_colors_are_none() {
    for input in ["", "#12", "#ggg", "rgb(", "not-a-color", "currentcolor", "inherit"] {
        assert!(parse_color(input).is_none(), "{:?} should not parse", input);
    }
}

#[test]
fn test_unparseable_text_contrast_is_error() {
    let cache = ColorCache::default();
    assert!(cache.text_contrast("#000", "nonsense").is_err());
    assert!(cache.text_contrast("#000", "#fff").is_ok());
}

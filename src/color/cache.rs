//! Three-tier color memo cache.
//!
//! Thread-safe, append-only maps keyed by normalized input:
//! - **parse**: trimmed, lowercased CSS string → `Option<Color>`
//! - **luminance**: packed RGB → relative luminance
//! - **contrast**: ordered pair of packed RGB → contrast ratio
//!
//! A hit returns exactly the value a miss would compute. When a tier grows
//! past its capacity it is cleared wholesale; entries are never updated in
//! place.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::parse::parse_color;
use super::wcag::{alpha_blend, ratio_from_luminance, relative_luminance};
use super::Color;
use crate::error::{Result, SweepError};

/// Capacity limits per cache tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_parse_entries: usize,
    pub max_luminance_entries: usize,
    pub max_contrast_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_parse_entries: 4_096,
            max_luminance_entries: 16_384,
            max_contrast_entries: 65_536,
        }
    }
}

#[derive(Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    flushes: AtomicU64,
}

impl TierCounters {
    fn snapshot(&self, entries: usize) -> TierStats {
        TierStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}

/// Memoized color parsing, luminance and contrast.
pub struct ColorCache {
    config: CacheConfig,
    parsed: RwLock<HashMap<String, Option<Color>>>,
    luminance: RwLock<HashMap<u32, f64>>,
    contrast: RwLock<HashMap<(u32, u32), f64>>,
    parse_counters: TierCounters,
    luminance_counters: TierCounters,
    contrast_counters: TierCounters,
}

impl std::fmt::Debug for ColorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorCache")
            .field("parsed", &self.parsed.read().len())
            .field("luminance", &self.luminance.read().len())
            .field("contrast", &self.contrast.read().len())
            .finish()
    }
}

impl Default for ColorCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ColorCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            parsed: RwLock::new(HashMap::new()),
            luminance: RwLock::new(HashMap::new()),
            contrast: RwLock::new(HashMap::new()),
            parse_counters: TierCounters::default(),
            luminance_counters: TierCounters::default(),
            contrast_counters: TierCounters::default(),
        }
    }

    /// Cached [`parse_color`]. Unparseable inputs are cached as `None` too.
    pub fn parse(&self, value: &str) -> Option<Color> {
        let key = value.trim().to_ascii_lowercase();

        if let Some(hit) = self.parsed.read().get(&key) {
            self.parse_counters.hits.fetch_add(1, Ordering::Relaxed);
            return *hit;
        }

        self.parse_counters.misses.fetch_add(1, Ordering::Relaxed);
        let color = parse_color(&key);
        insert_bounded(
            &self.parsed,
            key,
            color,
            self.config.max_parse_entries,
            &self.parse_counters,
        );
        color
    }

    /// Cached [`relative_luminance`], keyed by RGB only.
    pub fn luminance(&self, color: Color) -> f64 {
        let key = color.rgb_key();

        if let Some(hit) = self.luminance.read().get(&key) {
            self.luminance_counters.hits.fetch_add(1, Ordering::Relaxed);
            return *hit;
        }

        self.luminance_counters.misses.fetch_add(1, Ordering::Relaxed);
        let value = relative_luminance(color);
        insert_bounded(
            &self.luminance,
            key,
            value,
            self.config.max_luminance_entries,
            &self.luminance_counters,
        );
        value
    }

    /// Cached contrast ratio between two colors (alpha ignored, blend first).
    pub fn contrast(&self, a: Color, b: Color) -> f64 {
        let (ka, kb) = (a.rgb_key(), b.rgb_key());
        let key = if ka <= kb { (ka, kb) } else { (kb, ka) };

        if let Some(hit) = self.contrast.read().get(&key) {
            self.contrast_counters.hits.fetch_add(1, Ordering::Relaxed);
            return *hit;
        }

        self.contrast_counters.misses.fetch_add(1, Ordering::Relaxed);
        let ratio = ratio_from_luminance(self.luminance(a), self.luminance(b));
        insert_bounded(
            &self.contrast,
            key,
            ratio,
            self.config.max_contrast_entries,
            &self.contrast_counters,
        );
        ratio
    }

    /// Contrast of a (possibly translucent) foreground over an opaque background.
    ///
    /// Fails when either color is unparseable; callers must not substitute a
    /// default.
    pub fn text_contrast(&self, foreground: &str, background: &str) -> Result<f64> {
        let fg = self
            .parse(foreground)
            .ok_or_else(|| SweepError::UnparseableColor(foreground.to_string()))?;
        let bg = self
            .parse(background)
            .ok_or_else(|| SweepError::UnparseableColor(background.to_string()))?;

        let bg = alpha_blend(bg, Color::WHITE);
        Ok(self.contrast(alpha_blend(fg, bg), bg))
    }

    /// Drop every tier.
    pub fn clear(&self) {
        self.parsed.write().clear();
        self.luminance.write().clear();
        self.contrast.write().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            parse: self.parse_counters.snapshot(self.parsed.read().len()),
            luminance: self
                .luminance_counters
                .snapshot(self.luminance.read().len()),
            contrast: self.contrast_counters.snapshot(self.contrast.read().len()),
        }
    }
}

fn insert_bounded<K, V>(
    map: &RwLock<HashMap<K, V>>,
    key: K,
    value: V,
    capacity: usize,
    counters: &TierCounters,
) where
    K: std::hash::Hash + Eq,
{
    let mut guard = map.write();
    if guard.len() >= capacity.max(1) {
        guard.clear();
        counters.flushes.fetch_add(1, Ordering::Relaxed);
    }
    guard.insert(key, value);
}

/// Per-tier cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub flushes: u64,
}

impl TierStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub parse: TierStats,
    pub luminance: TierStats,
    pub contrast: TierStats,
}

//! # Sampler
//!
//! Picks a bounded, ordered subset of candidate elements to evaluate.
//!
//! Strategies:
//! - **Viewport**: in-viewport (± margin) candidates first, then the rest
//! - **Random**: seeded uniform shuffle, then truncate
//! - **Priority**: fixed weighted score, descending, stable on ties
//! - **Adaptive**: Priority ordering cut to a bounded fraction of the input
//!
//! Output never exceeds `limit` nor the input size, and is reproducible for
//! fixed inputs and seed.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::{ElementRef, Rect, Viewport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SamplingStrategy {
    Viewport,
    Random,
    #[default]
    Priority,
    Adaptive,
}

// Priority rubric weights
const WEIGHT_INTERACTIVE: u32 = 5;
const WEIGHT_LANDMARK: u32 = 4;
const WEIGHT_HEADING: u32 = 3;
const WEIGHT_IN_VIEWPORT: u32 = 2;
const WEIGHT_TEXT: u32 = 1;

const INTERACTIVE_TAGS: &[&str] = &[
    "a", "button", "input", "select", "textarea", "summary", "details", "option",
];
const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "checkbox", "radio", "switch", "tab", "menuitem", "textbox", "combobox",
    "slider", "option",
];
const LANDMARK_TAGS: &[&str] = &["header", "nav", "main", "footer", "aside", "section", "form"];
const LANDMARK_ROLES: &[&str] = &[
    "banner",
    "navigation",
    "main",
    "contentinfo",
    "complementary",
    "region",
    "search",
    "form",
];
const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Pixels added around the viewport when testing visibility
    pub viewport_margin: f64,
    /// Seed for the random strategy; `None` draws from OS entropy
    pub seed: Option<u64>,
    /// Share of the input kept by the adaptive strategy
    pub adaptive_fraction: f64,
    /// Adaptive never keeps fewer than this (input and limit permitting)
    pub adaptive_min: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            viewport_margin: 200.0,
            seed: None,
            adaptive_fraction: 0.25,
            adaptive_min: 20,
        }
    }
}

pub struct Sampler {
    config: SamplerConfig,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new(SamplerConfig::default())
    }
}

impl Sampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Select at most `limit` elements from `elements` using `strategy`.
    pub fn sample(
        &self,
        elements: &[Arc<ElementRef>],
        strategy: SamplingStrategy,
        limit: usize,
        viewport: &Viewport,
    ) -> Vec<Arc<ElementRef>> {
        let limit = limit.min(elements.len());
        if limit == 0 {
            return Vec::new();
        }

        let visible = viewport.rect().expand(self.config.viewport_margin);

        let selected = match strategy {
            SamplingStrategy::Viewport => self.by_viewport(elements, limit, &visible),
            SamplingStrategy::Random => self.by_random(elements, limit),
            SamplingStrategy::Priority => self.by_priority(elements, limit, &visible),
            SamplingStrategy::Adaptive => {
                let size = self.adaptive_size(elements.len(), limit);
                self.by_priority(elements, size, &visible)
            }
        };

        log::debug!(
            "Sampled {} of {} elements ({:?}, limit {})",
            selected.len(),
            elements.len(),
            strategy,
            limit
        );
        selected
    }

    /// `min(limit, n, max(floor(n * fraction), min_floor))`
    pub fn adaptive_size(&self, n: usize, limit: usize) -> usize {
        let fraction = (n as f64 * self.config.adaptive_fraction.clamp(0.0, 1.0)).floor() as usize;
        fraction.max(self.config.adaptive_min).min(limit).min(n)
    }

    fn by_viewport(
        &self,
        elements: &[Arc<ElementRef>],
        limit: usize,
        visible: &Rect,
    ) -> Vec<Arc<ElementRef>> {
        let (inside, outside): (Vec<_>, Vec<_>) = elements
            .iter()
            .cloned()
            .partition(|el| in_viewport(el, visible));

        inside.into_iter().chain(outside).take(limit).collect()
    }

    fn by_random(&self, elements: &[Arc<ElementRef>], limit: usize) -> Vec<Arc<ElementRef>> {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut shuffled = elements.to_vec();
        shuffled.shuffle(&mut rng);
        shuffled.truncate(limit);
        shuffled
    }

    fn by_priority(
        &self,
        elements: &[Arc<ElementRef>],
        limit: usize,
        visible: &Rect,
    ) -> Vec<Arc<ElementRef>> {
        let mut scored: Vec<(u32, &Arc<ElementRef>)> = elements
            .iter()
            .map(|el| (priority_score(el, visible), el))
            .collect();

        // Stable sort keeps original order among equal scores
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        scored
            .into_iter()
            .take(limit)
            .map(|(_, el)| el.clone())
            .collect()
    }
}

fn in_viewport(element: &ElementRef, visible: &Rect) -> bool {
    !element.rect.is_empty() && element.rect.intersects(visible)
}

fn role(element: &ElementRef) -> Option<&str> {
    element.attr("role").map(str::trim)
}

pub fn is_interactive(element: &ElementRef) -> bool {
    INTERACTIVE_TAGS.contains(&element.tag.as_str())
        || role(element).is_some_and(|r| INTERACTIVE_ROLES.contains(&r))
        || element.has_attr("tabindex")
}

pub fn is_landmark(element: &ElementRef) -> bool {
    LANDMARK_TAGS.contains(&element.tag.as_str())
        || role(element).is_some_and(|r| LANDMARK_ROLES.contains(&r))
        || element.attributes.keys().any(|k| k.starts_with("aria-"))
}

pub fn is_heading(element: &ElementRef) -> bool {
    HEADING_TAGS.contains(&element.tag.as_str()) || role(element) == Some("heading")
}

/// Weighted rubric score; higher is sampled first.
pub fn priority_score(element: &ElementRef, visible: &Rect) -> u32 {
    let mut score = 0;
    if is_interactive(element) {
        score += WEIGHT_INTERACTIVE;
    }
    if is_landmark(element) {
        score += WEIGHT_LANDMARK;
    }
    if is_heading(element) {
        score += WEIGHT_HEADING;
    }
    if in_viewport(element, visible) {
        score += WEIGHT_IN_VIEWPORT;
    }
    if element.has_text() {
        score += WEIGHT_TEXT;
    }
    score
}

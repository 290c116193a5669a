//! Core data types shared across the pipeline.
//!
//! Element references, evaluation results and the small enums that classify
//! them. Everything here is immutable once built and cheap to clone
//! (element references travel behind `Arc`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ================================================================================================
// ELEMENT IDENTITY & GEOMETRY
// ================================================================================================

/// Stable per-element integer handle assigned by the page model adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementHandle(pub u64);

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Axis-aligned rectangle in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// True when the rectangle has no area (detached or `display: none`).
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Grow the rectangle by `margin` on every side.
    pub fn expand(&self, margin: f64) -> Rect {
        Rect {
            x: self.x - margin,
            y: self.y - margin,
            width: self.width + 2.0 * margin,
            height: self.height + 2.0 * margin,
        }
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// Snapshot of the host viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn rect(&self) -> Rect {
        Rect::new(self.scroll_x, self.scroll_y, self.width, self.height)
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            scroll_x: 0.0,
            scroll_y: 0.0,
            width: 1280.0,
            height: 720.0,
        }
    }
}

// ================================================================================================
// CLASSIFICATION
// ================================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Contrast,
    Structure,
    Aria,
    Keyboard,
    Forms,
    Media,
    Other,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Contrast => "contrast",
            Category::Structure => "structure",
            Category::Aria => "aria",
            Category::Keyboard => "keyboard",
            Category::Forms => "forms",
            Category::Media => "media",
            Category::Other => "other",
        };
        f.write_str(s)
    }
}

/// WCAG conformance level a finding is tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComplianceLevel {
    A,
    AA,
    AAA,
}

impl fmt::Display for ComplianceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComplianceLevel::A => "A",
            ComplianceLevel::AA => "AA",
            ComplianceLevel::AAA => "AAA",
        };
        f.write_str(s)
    }
}

/// Result type synthesized from category and severity, e.g. `contrast-violation`.
pub fn result_type(category: Category, severity: Severity) -> String {
    let kind = match severity {
        Severity::Error => "violation",
        Severity::Warning => "warning",
        Severity::Info => "notice",
    };
    format!("{}-{}", category, kind)
}

// ================================================================================================
// ELEMENT REFERENCE
// ================================================================================================

/// Immutable, size-bounded snapshot of one evaluated element.
///
/// Built once per element per session by [`crate::page::ElementRefArena`];
/// holds no link back to the live element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRef {
    pub handle: ElementHandle,
    pub selector: String,
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub text: String,
    pub rect: Rect,
}

impl ElementRef {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

// ================================================================================================
// EVALUATION RESULT
// ================================================================================================

/// One finding produced by a rule against one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Stable finding id (`rule_id@selector` unless the rule supplied one)
    pub id: String,
    pub rule_id: String,
    /// Synthesized from category and severity, see [`result_type`]
    pub result_type: String,
    pub category: Category,
    pub severity: Severity,
    pub level: ComplianceLevel,
    /// WCAG success criteria, e.g. `1.4.3`
    #[serde(default)]
    pub criteria: Vec<String>,
    pub selector: String,
    pub element: Arc<ElementRef>,
    pub message: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub timestamp: u64,
}

impl EvaluationResult {
    pub fn is_violation(&self) -> bool {
        self.severity == Severity::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_intersection() {
        let a = Rect::new(0.0, 0.0, 100.0, 100.0);
        let b = Rect::new(50.0, 50.0, 100.0, 100.0);
        let c = Rect::new(200.0, 200.0, 10.0, 10.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(a.expand(150.0).intersects(&c));
    }

    #[test]
    fn test_touching_edges_do_not_intersect() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(10.0, 0.0, 10.0, 10.0);
        assert!(!a.intersects(&b));
    }

    #[test]
    fn test_result_type_synthesis() {
        assert_eq!(result_type(Category::Contrast, Severity::Error), "contrast-violation");
        assert_eq!(result_type(Category::Keyboard, Severity::Warning), "keyboard-warning");
        assert_eq!(result_type(Category::Aria, Severity::Info), "aria-notice");
    }

    #[test]
    fn test_severity_serializes_lowercase() {
        let json = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
    }
}

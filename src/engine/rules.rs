//! Built-in WCAG rules, bundled as the `wcag-core` plugin.

use std::sync::Arc;

use super::{EvaluationContext, PartialResult, Plugin, Rule, RuleOutcome};
use crate::color::wcag::is_large_text;
use crate::color::{required_ratio, ContrastLevel};
use crate::error::Result;
use crate::types::{Category, ComplianceLevel, ElementRef, Severity};

fn has_accessible_label(element: &ElementRef) -> bool {
    ["aria-label", "aria-labelledby", "title"]
        .iter()
        .any(|name| element.attr(name).is_some_and(|v| !v.trim().is_empty()))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ================================================================================================
// CONTRAST
// ================================================================================================

/// Text contrast against the resolved background (SC 1.4.3 / 1.4.6).
pub struct ColorContrast;

impl Rule for ColorContrast {
    fn id(&self) -> &str {
        "color-contrast"
    }

    fn description(&self) -> &str {
        "Text must have sufficient contrast against its background"
    }

    fn applies(&self, element: &ElementRef, _ctx: &EvaluationContext) -> bool {
        element.has_text()
    }

    fn evaluate(&self, element: &Arc<ElementRef>, ctx: &EvaluationContext) -> Result<RuleOutcome> {
        let Some(style) = ctx.style(element.handle) else {
            return Ok(RuleOutcome::Empty);
        };
        if style.is_hidden() {
            return Ok(RuleOutcome::Empty);
        }

        let background = ctx.resolve_background(element.handle)?;
        let foreground = ctx.resolve_foreground(&style, background)?;
        let ratio = ctx.colors.contrast(foreground, background);

        let level = ctx.options.contrast_level;
        let large = is_large_text(style.font_size, style.font_weight);
        let required = required_ratio(level, large);

        let (criterion, compliance) = match level {
            ContrastLevel::AA => ("1.4.3", ComplianceLevel::AA),
            ContrastLevel::AAA => ("1.4.6", ComplianceLevel::AAA),
        };

        let passes = ratio >= required;
        if passes && !ctx.options.include_passes {
            return Ok(RuleOutcome::Empty);
        }

        let (severity, message) = if passes {
            (
                Severity::Info,
                format!("Contrast ratio {:.2}:1 meets the required {}:1", ratio, required),
            )
        } else {
            (
                Severity::Error,
                format!(
                    "Contrast ratio {:.2}:1 is below the required {}:1",
                    ratio, required
                ),
            )
        };

        Ok(RuleOutcome::Partial(
            PartialResult::new(Category::Contrast, severity, message)
                .level(compliance)
                .criterion(criterion)
                .meta("ratio", round2(ratio))
                .meta("required", required)
                .meta("foreground", foreground.to_string())
                .meta("background", background.to_string())
                .meta("large_text", large),
        ))
    }
}

// ================================================================================================
// STRUCTURE & SEMANTICS
// ================================================================================================

/// Images need a text alternative (SC 1.1.1).
pub struct ImageAlt;

impl Rule for ImageAlt {
    fn id(&self) -> &str {
        "image-alt"
    }

    fn selector(&self) -> Option<&str> {
        Some("img, [role=img]")
    }

    fn evaluate(&self, element: &Arc<ElementRef>, _ctx: &EvaluationContext) -> Result<RuleOutcome> {
        // alt="" marks the image decorative
        if element.has_attr("alt") || has_accessible_label(element) {
            return Ok(RuleOutcome::Empty);
        }
        if element.attr("role") == Some("presentation") || element.attr("role") == Some("none") {
            return Ok(RuleOutcome::Empty);
        }

        Ok(RuleOutcome::Partial(
            PartialResult::new(
                Category::Media,
                Severity::Error,
                "Image has no text alternative",
            )
            .criterion("1.1.1"),
        ))
    }
}

/// Buttons and links need an accessible name (SC 4.1.2).
pub struct ControlName;

impl Rule for ControlName {
    fn id(&self) -> &str {
        "control-name"
    }

    fn selector(&self) -> Option<&str> {
        Some("button, a[href], [role=button], [role=link]")
    }

    fn evaluate(&self, element: &Arc<ElementRef>, _ctx: &EvaluationContext) -> Result<RuleOutcome> {
        if element.has_text() || has_accessible_label(element) {
            return Ok(RuleOutcome::Empty);
        }

        Ok(RuleOutcome::Partial(
            PartialResult::new(
                Category::Aria,
                Severity::Error,
                format!("<{}> has no accessible name", element.tag),
            )
            .criterion("4.1.2"),
        ))
    }
}

const VALID_ROLES: &[&str] = &[
    "alert", "alertdialog", "application", "article", "banner", "button", "cell", "checkbox",
    "columnheader", "combobox", "complementary", "contentinfo", "definition", "dialog",
    "directory", "document", "feed", "figure", "form", "grid", "gridcell", "group", "heading",
    "img", "link", "list", "listbox", "listitem", "log", "main", "marquee", "math", "menu",
    "menubar", "menuitem", "menuitemcheckbox", "menuitemradio", "meter", "navigation", "none",
    "note", "option", "presentation", "progressbar", "radio", "radiogroup", "region", "row",
    "rowgroup", "rowheader", "scrollbar", "search", "searchbox", "separator", "slider",
    "spinbutton", "status", "switch", "tab", "table", "tablist", "tabpanel", "term", "textbox",
    "timer", "toolbar", "tooltip", "tree", "treegrid", "treeitem",
];

/// `role` values must be defined ARIA roles (SC 4.1.2).
pub struct AriaValidRole;

impl Rule for AriaValidRole {
    fn id(&self) -> &str {
        "aria-valid-role"
    }

    fn selector(&self) -> Option<&str> {
        Some("[role]")
    }

    fn evaluate(&self, element: &Arc<ElementRef>, _ctx: &EvaluationContext) -> Result<RuleOutcome> {
        let role = element.attr("role").unwrap_or("");
        // Fallback role lists are valid when any token is known
        if role
            .split_whitespace()
            .any(|token| VALID_ROLES.contains(&token.to_ascii_lowercase().as_str()))
        {
            return Ok(RuleOutcome::Empty);
        }

        Ok(RuleOutcome::Partial(
            PartialResult::new(
                Category::Aria,
                Severity::Error,
                format!("'{}' is not a valid ARIA role", role),
            )
            .criterion("4.1.2")
            .meta("role", role),
        ))
    }
}

/// Positive tabindex breaks the natural focus order (SC 2.4.3).
pub struct TabindexPositive;

impl Rule for TabindexPositive {
    fn id(&self) -> &str {
        "tabindex-positive"
    }

    fn selector(&self) -> Option<&str> {
        Some("[tabindex]")
    }

    fn evaluate(&self, element: &Arc<ElementRef>, _ctx: &EvaluationContext) -> Result<RuleOutcome> {
        let value = element
            .attr("tabindex")
            .and_then(|v| v.trim().parse::<i32>().ok())
            .unwrap_or(0);
        if value <= 0 {
            return Ok(RuleOutcome::Empty);
        }

        Ok(RuleOutcome::Partial(
            PartialResult::new(
                Category::Keyboard,
                Severity::Warning,
                format!("tabindex={} overrides the natural focus order", value),
            )
            .criterion("2.4.3")
            .meta("tabindex", value),
        ))
    }
}

/// Headings must have content (SC 2.4.6).
pub struct EmptyHeading;

impl Rule for EmptyHeading {
    fn id(&self) -> &str {
        "empty-heading"
    }

    fn selector(&self) -> Option<&str> {
        Some("h1, h2, h3, h4, h5, h6, [role=heading]")
    }

    fn evaluate(&self, element: &Arc<ElementRef>, _ctx: &EvaluationContext) -> Result<RuleOutcome> {
        if element.has_text() || has_accessible_label(element) {
            return Ok(RuleOutcome::Empty);
        }

        Ok(RuleOutcome::Partial(
            PartialResult::new(Category::Structure, Severity::Error, "Heading is empty")
                .level(ComplianceLevel::AA)
                .criterion("2.4.6"),
        ))
    }
}

const UNLABELLED_INPUT_TYPES: &[&str] = &["hidden", "submit", "reset", "button", "image"];

/// Form controls need a label (SC 1.3.1, 3.3.2).
pub struct FormLabel;

impl Rule for FormLabel {
    fn id(&self) -> &str {
        "form-label"
    }

    fn selector(&self) -> Option<&str> {
        Some("input, select, textarea")
    }

    fn applies(&self, element: &ElementRef, _ctx: &EvaluationContext) -> bool {
        let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
        !UNLABELLED_INPUT_TYPES.contains(&kind.as_str())
    }

    fn evaluate(&self, element: &Arc<ElementRef>, ctx: &EvaluationContext) -> Result<RuleOutcome> {
        if has_accessible_label(element) {
            return Ok(RuleOutcome::Empty);
        }

        if let Some(id) = element.attr("id").filter(|id| !id.is_empty()) {
            let labels = ctx.page.query_all(&format!("label[for=\"{}\"]", id));
            if !labels.is_empty() {
                return Ok(RuleOutcome::Empty);
            }
        }

        Ok(RuleOutcome::Partial(
            PartialResult::new(
                Category::Forms,
                Severity::Error,
                format!("<{}> has no associated label", element.tag),
            )
            .criterion("1.3.1")
            .criterion("3.3.2"),
        ))
    }
}

// ================================================================================================
// PLUGIN
// ================================================================================================

pub struct WcagCorePlugin;

impl Plugin for WcagCorePlugin {
    fn id(&self) -> &str {
        "wcag-core"
    }

    fn rules(&self) -> Vec<Arc<dyn Rule>> {
        vec![
            Arc::new(ColorContrast),
            Arc::new(ImageAlt),
            Arc::new(ControlName),
            Arc::new(AriaValidRole),
            Arc::new(TabindexPositive),
            Arc::new(EmptyHeading),
            Arc::new(FormLabel),
        ]
    }
}

pub fn builtin_plugin() -> Arc<dyn Plugin> {
    Arc::new(WcagCorePlugin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ColorCache;
    use crate::engine::{EvaluateOptions, RuleEngine};
    use crate::page::{ElementRefArena, ElementSpec, StaticPage};
    use crate::types::EvaluationResult;
    use tokio_util::sync::CancellationToken;

    fn run(page: Arc<StaticPage>, options: EvaluateOptions) -> Vec<EvaluationResult> {
        let engine = RuleEngine::with_builtin_rules().unwrap();
        let arena = Arc::new(ElementRefArena::default());
        let elements: Vec<_> = page
            .handles()
            .into_iter()
            .filter_map(|h| arena.get_or_create(page.as_ref(), h))
            .collect();
        let ctx = EvaluationContext::new(
            page,
            Arc::new(ColorCache::default()),
            arena,
            options,
            CancellationToken::new(),
        );
        engine.evaluate(&elements, &ctx)
    }

    fn rule_ids(results: &[EvaluationResult]) -> Vec<&str> {
        results.iter().map(|r| r.rule_id.as_str()).collect()
    }

    #[test]
    fn test_builtin_plugin_registers_seven_rules() {
        let engine = RuleEngine::with_builtin_rules().unwrap();
        assert_eq!(engine.rule_ids().len(), 7);
        assert_eq!(engine.plugin_ids(), vec!["wcag-core".to_string()]);
    }

    #[test]
    fn test_low_contrast_text_is_flagged() {
        let page = Arc::new(StaticPage::new());
        page.append(
            None,
            ElementSpec::new("p").text("faint").color("#aaaaaa").background("#ffffff"),
        );
        page.append(
            None,
            ElementSpec::new("p").text("strong").color("#111111").background("#ffffff"),
        );

        let results = run(page, EvaluateOptions::default());
        assert_eq!(rule_ids(&results), vec!["color-contrast"]);
        let r = &results[0];
        assert_eq!(r.result_type, "contrast-violation");
        assert_eq!(r.criteria, vec!["1.4.3".to_string()]);
        let ratio = r.metadata["ratio"].as_f64().unwrap();
        assert!(ratio < 4.5 && ratio > 2.0);
    }

    #[test]
    fn test_large_text_uses_relaxed_threshold() {
        let page = Arc::new(StaticPage::new());
        // #949494 on white is about 3.03:1
        page.append(
            None,
            ElementSpec::new("h1").text("Big").color("#949494").font(32.0, 700),
        );

        assert!(run(page.clone(), EvaluateOptions::default()).is_empty());

        let aaa = EvaluateOptions {
            contrast_level: ContrastLevel::AAA,
            ..EvaluateOptions::default()
        };
        let results = run(page, aaa);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].criteria, vec!["1.4.6".to_string()]);
    }

    #[test]
    fn test_opacity_reduces_contrast() {
        let page = Arc::new(StaticPage::new());
        page.append(None, ElementSpec::new("p").text("ghost").opacity(0.3));
        let results = run(page, EvaluateOptions::default());
        assert_eq!(rule_ids(&results), vec!["color-contrast"]);
    }

    #[test]
    fn test_unparseable_color_fails_only_that_rule() {
        let page = Arc::new(StaticPage::new());
        page.append(None, ElementSpec::new("button").text("").color("garbage"));
        page.append(None, ElementSpec::new("p").text("x").color("wat"));

        // The contrast rule errors on the paragraph; control-name still fires
        let results = run(page, EvaluateOptions::default());
        assert_eq!(rule_ids(&results), vec!["control-name"]);
    }

    #[test]
    fn test_structural_rules() {
        let page = Arc::new(StaticPage::new());
        page.append(None, ElementSpec::new("img").attr("src", "a.png"));
        page.append(None, ElementSpec::new("img").attr("alt", ""));
        page.append(None, ElementSpec::new("div").attr("role", "buton"));
        page.append(None, ElementSpec::new("div").attr("tabindex", "3").text("x"));
        page.append(None, ElementSpec::new("h2"));
        page.append(None, ElementSpec::new("input").attr("id", "email"));
        page.append(None, ElementSpec::new("input").attr("id", "name"));
        page.append(None, ElementSpec::new("label").attr("for", "name").text("Name"));
        page.append(None, ElementSpec::new("input").attr("type", "hidden"));

        let results = run(page, EvaluateOptions::default());
        assert_eq!(
            rule_ids(&results),
            vec![
                "image-alt",
                "aria-valid-role",
                "tabindex-positive",
                "empty-heading",
                "form-label",
            ]
        );
        let tab = &results[2];
        assert_eq!(tab.severity, Severity::Warning);
        assert_eq!(tab.result_type, "keyboard-warning");
    }

    #[test]
    fn test_include_passes_emits_info() {
        let page = Arc::new(StaticPage::new());
        page.append(None, ElementSpec::new("p").text("fine"));
        let options = EvaluateOptions {
            include_passes: true,
            ..EvaluateOptions::default()
        };
        let results = run(page, options);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].severity, Severity::Info);
        assert!(!results[0].is_violation());
    }
}

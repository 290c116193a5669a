//! Per-run evaluation context and caller options.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::color::{alpha_blend, Color, ColorCache, ContrastLevel};
use crate::error::{Result, SweepError};
use crate::page::{ComputedStyle, ElementRefArena, PageModel};
use crate::sampler::SamplingStrategy;
use crate::types::{now_ms, ElementHandle, Viewport};

/// Caller-facing options for one evaluation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluateOptions {
    /// Only run these rule ids (all rules when `None`)
    pub rules: Option<Vec<String>>,
    /// Never run these rule ids
    pub exclude_rules: Vec<String>,
    pub contrast_level: ContrastLevel,
    pub strategy: SamplingStrategy,
    /// Maximum elements sampled per request
    pub sample_limit: usize,
    /// Overrides the scheduler's chunk size for this request
    pub chunk_size: Option<usize>,
    /// Advisory deadline, checked at chunk boundaries
    pub timeout_ms: Option<u64>,
    /// Seed for the random sampling strategy
    pub seed: Option<u64>,
    /// Emit informational results for elements that pass
    pub include_passes: bool,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self {
            rules: None,
            exclude_rules: Vec::new(),
            contrast_level: ContrastLevel::AA,
            strategy: SamplingStrategy::Priority,
            sample_limit: 500,
            chunk_size: None,
            timeout_ms: None,
            seed: None,
            include_passes: false,
        }
    }
}

impl EvaluateOptions {
    pub fn validate(&self) -> Result<()> {
        if self.sample_limit == 0 {
            return Err(SweepError::InvalidOptions(
                "sample_limit must be greater than zero".to_string(),
            ));
        }
        if self.chunk_size == Some(0) {
            return Err(SweepError::InvalidOptions(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.timeout_ms == Some(0) {
            return Err(SweepError::InvalidOptions(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the include/exclude filters let `rule_id` run.
    pub fn allows_rule(&self, rule_id: &str) -> bool {
        if self.exclude_rules.iter().any(|r| r == rule_id) {
            return false;
        }
        match &self.rules {
            Some(include) => include.iter().any(|r| r == rule_id),
            None => true,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Everything a rule can see during one evaluation run.
///
/// Built fresh per run and never shared across runs.
#[derive(Clone)]
pub struct EvaluationContext {
    pub run_id: String,
    pub options: Arc<EvaluateOptions>,
    pub cancel: CancellationToken,
    pub viewport: Viewport,
    /// Wall-clock start of the run, ms since epoch
    pub timestamp: u64,
    pub page: Arc<dyn PageModel>,
    pub colors: Arc<ColorCache>,
    pub arena: Arc<ElementRefArena>,
}

impl EvaluationContext {
    pub fn new(
        page: Arc<dyn PageModel>,
        colors: Arc<ColorCache>,
        arena: Arc<ElementRefArena>,
        options: EvaluateOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            options: Arc::new(options),
            cancel,
            viewport: page.viewport(),
            timestamp: now_ms(),
            page,
            colors,
            arena,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn style(&self, handle: ElementHandle) -> Option<ComputedStyle> {
        self.page.computed_style(handle)
    }

    /// Effective opaque background behind `handle`.
    ///
    /// Walks ancestors until an opaque background is found (or the root),
    /// then composites the translucent layers over white, outermost first.
    /// Fails when any background on the way is unparseable.
    pub fn resolve_background(&self, handle: ElementHandle) -> Result<Color> {
        let mut layers = Vec::new();
        let mut current = Some(handle);

        while let Some(h) = current {
            if let Some(style) = self.page.computed_style(h) {
                let bg = self
                    .colors
                    .parse(&style.background_color)
                    .ok_or_else(|| SweepError::UnparseableColor(style.background_color.clone()))?;
                if !bg.is_transparent() {
                    layers.push(bg);
                    if bg.is_opaque() {
                        break;
                    }
                }
            }
            current = self.page.node(h).and_then(|n| n.parent);
        }

        Ok(layers
            .into_iter()
            .rev()
            .fold(Color::WHITE, |under, layer| alpha_blend(layer, under)))
    }

    /// Foreground text color of `handle` composited over `background`.
    ///
    /// Element opacity multiplies the foreground alpha.
    pub fn resolve_foreground(&self, style: &ComputedStyle, background: Color) -> Result<Color> {
        let fg = self
            .colors
            .parse(&style.color)
            .ok_or_else(|| SweepError::UnparseableColor(style.color.clone()))?;
        let opacity = if style.opacity.is_nan() {
            1.0
        } else {
            style.opacity.clamp(0.0, 1.0)
        };
        Ok(alpha_blend(fg.with_opacity(opacity), background))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{ElementSpec, StaticPage};

    fn context(page: Arc<StaticPage>) -> EvaluationContext {
        EvaluationContext::new(
            page,
            Arc::new(ColorCache::default()),
            Arc::new(ElementRefArena::default()),
            EvaluateOptions::default(),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_rule_filters() {
        let options = EvaluateOptions {
            rules: Some(vec!["a".to_string(), "b".to_string()]),
            exclude_rules: vec!["b".to_string()],
            ..EvaluateOptions::default()
        };
        assert!(options.allows_rule("a"));
        assert!(!options.allows_rule("b"));
        assert!(!options.allows_rule("c"));
        assert!(EvaluateOptions::default().allows_rule("anything"));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let bad = EvaluateOptions {
            chunk_size: Some(0),
            ..EvaluateOptions::default()
        };
        assert!(matches!(bad.validate(), Err(SweepError::InvalidOptions(_))));
        assert!(EvaluateOptions::default().validate().is_ok());
    }

    #[test]
    fn test_background_walks_ancestors() {
        let page = Arc::new(StaticPage::new());
        let outer = page.append(None, ElementSpec::new("div").background("#000000"));
        let inner = page.append(Some(outer), ElementSpec::new("p"));

        let ctx = context(page);
        assert_eq!(ctx.resolve_background(inner).unwrap(), Color::BLACK);
    }

    #[test]
    fn test_background_composites_translucent_layers() {
        let page = Arc::new(StaticPage::new());
        let outer = page.append(None, ElementSpec::new("div"));
        let inner = page.append(
            Some(outer),
            ElementSpec::new("p").background("rgba(0, 0, 0, 0.5)"),
        );

        let ctx = context(page);
        let bg = ctx.resolve_background(inner).unwrap();
        assert_eq!((bg.r, bg.g, bg.b), (128, 128, 128));
        assert!(bg.is_opaque());
    }

    #[test]
    fn test_unparseable_background_fails() {
        let page = Arc::new(StaticPage::new());
        let h = page.append(None, ElementSpec::new("p").background("not-a-color"));
        let ctx = context(page);
        assert!(matches!(
            ctx.resolve_background(h),
            Err(SweepError::UnparseableColor(_))
        ));
    }
}

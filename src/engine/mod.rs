//! # Rule Engine
//!
//! Holds registered rules and plugins and runs them against batches of
//! element references.
//!
//! ## Rule outputs
//!
//! A rule returns a [`RuleOutcome`]: nothing, a complete
//! [`EvaluationResult`], or a [`PartialResult`] that the engine completes
//! with [`complete_partial`] (rule id, timestamp, selector, result type).
//!
//! ## Isolation
//!
//! Each rule invocation is isolated: an `Err` or a panic is logged and the
//! engine moves on to the next rule and element. Cancellation is checked
//! before every element and every rule; a cancelled run returns what it has.
//!
//! ## Registry
//!
//! The rule list is copy-on-write. Registration swaps in a new list, so
//! running evaluations keep iterating the snapshot they started with.

pub mod context;
pub mod rules;

pub use context::{EvaluateOptions, EvaluationContext};
pub use rules::{builtin_plugin, WcagCorePlugin};

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Result, SweepError};
use crate::page::{NodeInfo, Selector};
use crate::types::{
    result_type, Category, ComplianceLevel, ElementRef, EvaluationResult, Severity,
};

// ================================================================================================
// RULE & PLUGIN INTERFACE
// ================================================================================================

/// Finding without identity; the engine stamps the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialResult {
    pub category: Category,
    pub severity: Severity,
    pub level: ComplianceLevel,
    pub criteria: Vec<String>,
    pub message: String,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl PartialResult {
    pub fn new(category: Category, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            level: ComplianceLevel::A,
            criteria: Vec::new(),
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn level(mut self, level: ComplianceLevel) -> Self {
        self.level = level;
        self
    }

    pub fn criterion(mut self, criterion: &str) -> Self {
        self.criteria.push(criterion.to_string());
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// What a rule produced for one element.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Empty,
    Full(EvaluationResult),
    Partial(PartialResult),
}

/// Turn a partial finding into a complete result.
pub fn complete_partial(
    rule_id: &str,
    element: &Arc<ElementRef>,
    partial: PartialResult,
    timestamp: u64,
) -> EvaluationResult {
    EvaluationResult {
        id: format!("{}@{}", rule_id, element.selector),
        rule_id: rule_id.to_string(),
        result_type: result_type(partial.category, partial.severity),
        category: partial.category,
        severity: partial.severity,
        level: partial.level,
        criteria: partial.criteria,
        selector: element.selector.clone(),
        element: element.clone(),
        message: partial.message,
        metadata: partial.metadata,
        timestamp,
    }
}

/// One named unit of evaluation logic.
pub trait Rule: Send + Sync {
    fn id(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// CSS-like applicability filter; every element when `None`.
    ///
    /// Matched against the live node, so any attribute can be selected on.
    /// Elements no longer in the page fall back to their snapshot, which
    /// keeps only whitelisted attributes.
    fn selector(&self) -> Option<&str> {
        None
    }

    /// Custom applicability predicate, checked after the selector.
    fn applies(&self, _element: &ElementRef, _ctx: &EvaluationContext) -> bool {
        true
    }

    fn evaluate(&self, element: &Arc<ElementRef>, ctx: &EvaluationContext) -> Result<RuleOutcome>;
}

/// Named bundle of rules with an optional initialization hook.
pub trait Plugin: Send + Sync {
    fn id(&self) -> &str;

    fn rules(&self) -> Vec<Arc<dyn Rule>>;

    /// Called once at registration, before the plugin's rules are published.
    /// An error here aborts the registration.
    fn initialize(&self, _engine: &RuleEngine) -> Result<()> {
        Ok(())
    }
}

// ================================================================================================
// ENGINE
// ================================================================================================

struct RegisteredRule {
    rule: Arc<dyn Rule>,
    selector: Option<Selector>,
}

impl RegisteredRule {
    fn new(rule: Arc<dyn Rule>) -> Result<Self> {
        let selector = rule.selector().map(Selector::parse).transpose()?;
        Ok(Self { rule, selector })
    }

    fn applies(
        &self,
        element: &ElementRef,
        node: Option<&NodeInfo>,
        ctx: &EvaluationContext,
    ) -> bool {
        let selected = match (&self.selector, node) {
            (None, _) => true,
            (Some(s), Some(node)) => s.matches(node),
            (Some(s), None) => s.matches(element),
        };
        selected && ctx.options.allows_rule(self.rule.id()) && self.rule.applies(element, ctx)
    }
}

fn prepare(rules: Vec<Arc<dyn Rule>>) -> Result<Vec<Arc<RegisteredRule>>> {
    rules
        .into_iter()
        .map(|r| RegisteredRule::new(r).map(Arc::new))
        .collect()
}

/// First id in `prepared` that is already registered or repeated.
fn first_duplicate(
    existing: &[Arc<RegisteredRule>],
    prepared: &[Arc<RegisteredRule>],
) -> Option<String> {
    let mut seen: HashSet<&str> = existing.iter().map(|r| r.rule.id()).collect();
    prepared
        .iter()
        .find(|r| !seen.insert(r.rule.id()))
        .map(|r| r.rule.id().to_string())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub rules: usize,
    pub plugins: usize,
    pub invocations: u64,
    pub failures: u64,
}

pub struct RuleEngine {
    rules: RwLock<Arc<Vec<Arc<RegisteredRule>>>>,
    plugins: RwLock<Vec<String>>,
    invocations: AtomicU64,
    failures: AtomicU64,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Arc::new(Vec::new())),
            plugins: RwLock::new(Vec::new()),
            invocations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Engine preloaded with the built-in plugin.
    pub fn with_builtin_rules() -> Result<Self> {
        let engine = Self::new();
        engine.register_plugin(builtin_plugin())?;
        Ok(engine)
    }

    /// Register a single rule. Rule ids are unique; selectors must parse.
    pub fn register_rule(&self, rule: Arc<dyn Rule>) -> Result<()> {
        self.register_all(vec![rule])
    }

    /// Validate the rules of `plugin`, run its initialize hook, then publish
    /// the rules.
    ///
    /// Registration is all-or-nothing: a duplicate id, bad selector or failed
    /// initialize leaves the registry untouched.
    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let id = plugin.id().to_string();
        {
            // Reserve the id so concurrent registrations cannot both pass
            let mut plugins = self.plugins.write();
            if plugins.contains(&id) {
                return Err(SweepError::DuplicatePlugin(id));
            }
            plugins.push(id.clone());
        }

        let outcome = prepare(plugin.rules()).and_then(|prepared| {
            if let Some(dup) = first_duplicate(&self.rules.read(), &prepared) {
                return Err(SweepError::DuplicateRule(dup));
            }
            plugin.initialize(self)?;
            self.publish(prepared)
        });

        match outcome {
            Ok(()) => {
                log::info!("Registered plugin '{}'", id);
                Ok(())
            }
            Err(e) => {
                self.plugins.write().retain(|p| p != &id);
                log::warn!("Plugin '{}' not registered: {}", id, e);
                Err(e)
            }
        }
    }

    fn register_all(&self, new_rules: Vec<Arc<dyn Rule>>) -> Result<()> {
        self.publish(prepare(new_rules)?)
    }

    fn publish(&self, prepared: Vec<Arc<RegisteredRule>>) -> Result<()> {
        let mut guard = self.rules.write();
        if let Some(dup) = first_duplicate(&guard, &prepared) {
            return Err(SweepError::DuplicateRule(dup));
        }

        let mut next: Vec<Arc<RegisteredRule>> = guard.iter().cloned().collect();
        for r in prepared {
            log::debug!("Registered rule '{}'", r.rule.id());
            next.push(r);
        }
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn has_rule(&self, rule_id: &str) -> bool {
        self.rules.read().iter().any(|r| r.rule.id() == rule_id)
    }

    pub fn rule_ids(&self) -> Vec<String> {
        self.rules
            .read()
            .iter()
            .map(|r| r.rule.id().to_string())
            .collect()
    }

    pub fn plugin_ids(&self) -> Vec<String> {
        self.plugins.read().clone()
    }

    /// Fail on include-filter ids that no registered rule has.
    pub fn check_options(&self, options: &EvaluateOptions) -> Result<()> {
        options.validate()?;
        if let Some(include) = &options.rules {
            if let Some(unknown) = include.iter().find(|id| !self.has_rule(id)) {
                return Err(SweepError::UnknownRule(unknown.clone()));
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            rules: self.rules.read().len(),
            plugins: self.plugins.read().len(),
            invocations: self.invocations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Evaluate `elements` in order and return their results in order.
    pub fn evaluate(
        &self,
        elements: &[Arc<ElementRef>],
        ctx: &EvaluationContext,
    ) -> Vec<EvaluationResult> {
        let rules = self.rules.read().clone();
        let mut results = Vec::new();

        for element in elements {
            if ctx.is_cancelled() {
                log::debug!("[{}] cancelled before element {}", ctx.run_id, element.handle);
                break;
            }
            if !self.evaluate_element(&rules, element, ctx, &mut results) {
                break;
            }
        }

        results
    }

    /// Returns false when the run was cancelled mid-element.
    fn evaluate_element(
        &self,
        rules: &[Arc<RegisteredRule>],
        element: &Arc<ElementRef>,
        ctx: &EvaluationContext,
        out: &mut Vec<EvaluationResult>,
    ) -> bool {
        // Selectors see every live attribute, not just the snapshot's whitelist
        let node = ctx.page.node(element.handle);
        for registered in rules {
            if ctx.is_cancelled() {
                return false;
            }
            if !registered.applies(element, node.as_ref(), ctx) {
                continue;
            }

            let rule_id = registered.rule.id();
            self.invocations.fetch_add(1, Ordering::Relaxed);

            let outcome = catch_unwind(AssertUnwindSafe(|| {
                registered.rule.evaluate(element, ctx)
            }))
            .unwrap_or_else(|_| Err(SweepError::RulePanicked(rule_id.to_string())));

            match outcome {
                Ok(RuleOutcome::Empty) => {}
                Ok(RuleOutcome::Full(result)) => out.push(result),
                Ok(RuleOutcome::Partial(partial)) => {
                    out.push(complete_partial(rule_id, element, partial, ctx.timestamp))
                }
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "[{}] rule '{}' failed on {}: {}",
                        ctx.run_id,
                        rule_id,
                        element.selector,
                        e
                    );
                }
            }
        }
        true
    }
}

//! # Page Model
//!
//! The visual tree the pipeline evaluates is owned by the host. This module
//! defines the narrow interface the core consumes ([`PageModel`]), the
//! element reference arena that snapshots live elements, and [`StaticPage`],
//! an in-memory tree used by headless hosts and tests.
//!
//! Every page operation is fallible or empty-capable: a missing node yields
//! `None`, a bad selector yields no elements.

pub mod arena;
pub mod selector;

pub use arena::{ArenaConfig, ArenaStats, ElementRefArena};
pub use selector::{Selector, SelectorTarget};

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::{ElementHandle, Rect, Viewport};

// ================================================================================================
// INTERFACE
// ================================================================================================

/// Structural facts about one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub handle: ElementHandle,
    /// Lowercase tag name
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    /// Visible text content
    pub text: String,
    pub parent: Option<ElementHandle>,
}

impl NodeInfo {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id").filter(|id| !id.is_empty())
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_whitespace()
    }
}

/// Subset of computed style the rules read.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedStyle {
    pub color: String,
    pub background_color: String,
    /// Pixels
    pub font_size: f64,
    pub font_weight: u16,
    pub opacity: f64,
    pub display: String,
    pub visibility: String,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            color: "rgb(0, 0, 0)".to_string(),
            background_color: "transparent".to_string(),
            font_size: 16.0,
            font_weight: 400,
            opacity: 1.0,
            display: "block".to_string(),
            visibility: "visible".to_string(),
        }
    }
}

impl ComputedStyle {
    pub fn is_hidden(&self) -> bool {
        self.display == "none" || self.visibility == "hidden" || self.opacity <= 0.0
    }
}

/// Change notification delivered to mutation observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationEvent {
    Added(ElementHandle),
    Removed(ElementHandle),
    AttributeChanged { handle: ElementHandle, name: String },
    TextChanged(ElementHandle),
    /// Geometry changed (resize or intersection with the viewport)
    Resized(ElementHandle),
}

impl MutationEvent {
    pub fn handle(&self) -> ElementHandle {
        match self {
            MutationEvent::Added(h)
            | MutationEvent::Removed(h)
            | MutationEvent::TextChanged(h)
            | MutationEvent::Resized(h) => *h,
            MutationEvent::AttributeChanged { handle, .. } => *handle,
        }
    }
}

pub type MutationCallback = Arc<dyn Fn(&MutationEvent) + Send + Sync>;

/// Host visual tree as seen by the evaluation core.
pub trait PageModel: Send + Sync {
    /// Elements matching `selector`, in document order. Empty on a bad selector.
    fn query_all(&self, selector: &str) -> Vec<ElementHandle>;

    fn node(&self, handle: ElementHandle) -> Option<NodeInfo>;

    fn computed_style(&self, handle: ElementHandle) -> Option<ComputedStyle>;

    fn bounding_rect(&self, handle: ElementHandle) -> Option<Rect>;

    fn viewport(&self) -> Viewport {
        Viewport::default()
    }

    /// Subscribe to change notifications. Returns false when the host cannot
    /// observe changes.
    fn observe_mutations(&self, _callback: MutationCallback) -> bool {
        false
    }
}

// ================================================================================================
// STATIC PAGE
// ================================================================================================

/// Builder for one element of a [`StaticPage`].
#[derive(Debug, Clone, Default)]
pub struct ElementSpec {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
    style: ComputedStyle,
    rect: Rect,
}

impl ElementSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            rect: Rect::new(0.0, 0.0, 100.0, 20.0),
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn color(mut self, color: &str) -> Self {
        self.style.color = color.to_string();
        self
    }

    pub fn background(mut self, color: &str) -> Self {
        self.style.background_color = color.to_string();
        self
    }

    pub fn font(mut self, size_px: f64, weight: u16) -> Self {
        self.style.font_size = size_px;
        self.style.font_weight = weight;
        self
    }

    pub fn opacity(mut self, opacity: f64) -> Self {
        self.style.opacity = opacity;
        self
    }

    pub fn style(mut self, style: ComputedStyle) -> Self {
        self.style = style;
        self
    }

    pub fn rect(mut self, rect: Rect) -> Self {
        self.rect = rect;
        self
    }
}

#[derive(Debug, Clone)]
struct StaticNode {
    info: NodeInfo,
    style: ComputedStyle,
    rect: Rect,
}

/// In-memory page for headless hosts and tests.
///
/// Handles are assigned in insertion order, so iteration order is document
/// order as long as children are appended after their parents.
pub struct StaticPage {
    nodes: RwLock<BTreeMap<ElementHandle, StaticNode>>,
    next_handle: AtomicU64,
    viewport: RwLock<Viewport>,
    observers: RwLock<Vec<MutationCallback>>,
}

impl Default for StaticPage {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticPage {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            next_handle: AtomicU64::new(1),
            viewport: RwLock::new(Viewport::default()),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn with_viewport(self, viewport: Viewport) -> Self {
        *self.viewport.write() = viewport;
        self
    }

    /// Append an element under `parent` (or at the root) and notify observers.
    pub fn append(&self, parent: Option<ElementHandle>, spec: ElementSpec) -> ElementHandle {
        let handle = ElementHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));

        let node = StaticNode {
            info: NodeInfo {
                handle,
                tag: spec.tag,
                attributes: spec.attributes,
                text: spec.text,
                parent,
            },
            style: spec.style,
            rect: spec.rect,
        };
        self.nodes.write().insert(handle, node);

        self.notify(&MutationEvent::Added(handle));
        handle
    }

    /// Remove an element and its whole subtree. Returns the number removed.
    pub fn remove(&self, handle: ElementHandle) -> usize {
        let removed = {
            let mut nodes = self.nodes.write();
            if !nodes.contains_key(&handle) {
                return 0;
            }

            // Collect descendants breadth-first
            let mut doomed = vec![handle];
            let mut i = 0;
            while i < doomed.len() {
                let current = doomed[i];
                doomed.extend(
                    nodes
                        .values()
                        .filter(|n| n.info.parent == Some(current))
                        .map(|n| n.info.handle),
                );
                i += 1;
            }

            for h in &doomed {
                nodes.remove(h);
            }
            doomed
        };

        for h in &removed {
            self.notify(&MutationEvent::Removed(*h));
        }
        removed.len()
    }

    pub fn set_attribute(&self, handle: ElementHandle, name: &str, value: &str) -> bool {
        let name = name.to_ascii_lowercase();
        let updated = match self.nodes.write().get_mut(&handle) {
            Some(node) => {
                node.info.attributes.insert(name.clone(), value.to_string());
                true
            }
            None => false,
        };

        if updated {
            self.notify(&MutationEvent::AttributeChanged { handle, name });
        }
        updated
    }

    pub fn set_text(&self, handle: ElementHandle, text: &str) -> bool {
        let updated = match self.nodes.write().get_mut(&handle) {
            Some(node) => {
                node.info.text = text.to_string();
                true
            }
            None => false,
        };

        if updated {
            self.notify(&MutationEvent::TextChanged(handle));
        }
        updated
    }

    pub fn set_style(&self, handle: ElementHandle, style: ComputedStyle) -> bool {
        let updated = match self.nodes.write().get_mut(&handle) {
            Some(node) => {
                node.style = style;
                true
            }
            None => false,
        };

        if updated {
            self.notify(&MutationEvent::AttributeChanged {
                handle,
                name: "style".to_string(),
            });
        }
        updated
    }

    pub fn set_rect(&self, handle: ElementHandle, rect: Rect) -> bool {
        let updated = match self.nodes.write().get_mut(&handle) {
            Some(node) => {
                node.rect = rect;
                true
            }
            None => false,
        };

        if updated {
            self.notify(&MutationEvent::Resized(handle));
        }
        updated
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        *self.viewport.write() = viewport;
    }

    /// Every handle in document order.
    pub fn handles(&self) -> Vec<ElementHandle> {
        self.nodes.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    fn notify(&self, event: &MutationEvent) {
        // Clone out so observers may call back into the page
        let observers = self.observers.read().clone();
        for observer in observers {
            observer(event);
        }
    }
}

impl PageModel for StaticPage {
    fn query_all(&self, selector: &str) -> Vec<ElementHandle> {
        let selector = match Selector::parse(selector) {
            Ok(s) => s,
            Err(e) => {
                log::debug!("query_all: {}", e);
                return Vec::new();
            }
        };

        self.nodes
            .read()
            .values()
            .filter(|n| selector.matches(&n.info))
            .map(|n| n.info.handle)
            .collect()
    }

    fn node(&self, handle: ElementHandle) -> Option<NodeInfo> {
        self.nodes.read().get(&handle).map(|n| n.info.clone())
    }

    fn computed_style(&self, handle: ElementHandle) -> Option<ComputedStyle> {
        self.nodes.read().get(&handle).map(|n| n.style.clone())
    }

    fn bounding_rect(&self, handle: ElementHandle) -> Option<Rect> {
        self.nodes.read().get(&handle).map(|n| n.rect)
    }

    fn viewport(&self) -> Viewport {
        *self.viewport.read()
    }

    fn observe_mutations(&self, callback: MutationCallback) -> bool {
        self.observers.write().push(callback);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_query_all_document_order() {
        let page = StaticPage::new();
        let body = page.append(None, ElementSpec::new("body"));
        let a = page.append(Some(body), ElementSpec::new("button").text("A"));
        let _div = page.append(Some(body), ElementSpec::new("div"));
        let b = page.append(Some(body), ElementSpec::new("button").text("B"));

        assert_eq!(page.query_all("button"), vec![a, b]);
        assert_eq!(page.query_all("*").len(), 4);
        assert!(page.query_all("div >").is_empty());
    }

    #[test]
    fn test_remove_subtree_notifies() {
        let page = StaticPage::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        assert!(page.observe_mutations(Arc::new(move |e: &MutationEvent| {
            sink.lock().push(e.clone());
        })));

        let root = page.append(None, ElementSpec::new("main"));
        let child = page.append(Some(root), ElementSpec::new("p"));
        let grandchild = page.append(Some(child), ElementSpec::new("span"));

        assert_eq!(page.remove(child), 2);
        assert!(page.node(grandchild).is_none());
        assert!(page.node(root).is_some());

        let removed: Vec<_> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                MutationEvent::Removed(h) => Some(*h),
                _ => None,
            })
            .collect();
        assert_eq!(removed, vec![child, grandchild]);
    }

    #[test]
    fn test_missing_nodes_are_none() {
        let page = StaticPage::new();
        let ghost = ElementHandle(99);
        assert!(page.node(ghost).is_none());
        assert!(page.computed_style(ghost).is_none());
        assert!(page.bounding_rect(ghost).is_none());
        assert!(!page.set_attribute(ghost, "id", "x"));
        assert_eq!(page.remove(ghost), 0);
    }

    #[test]
    fn test_hidden_style() {
        let mut style = ComputedStyle::default();
        assert!(!style.is_hidden());
        style.display = "none".to_string();
        assert!(style.is_hidden());
    }
}

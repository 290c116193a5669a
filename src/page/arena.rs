//! Element reference arena.
//!
//! Snapshots live elements into immutable [`ElementRef`]s indexed by
//! [`ElementHandle`]. A reference is built once per element per session and
//! shared behind `Arc`; the arena never holds anything that keeps the live
//! element alive. Entries leave the arena when the page reports the element
//! removed (or changed, so the next lookup re-snapshots it), or when the
//! arena is full and the oldest tenth is evicted.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{MutationEvent, NodeInfo, PageModel};
use crate::types::{ElementHandle, ElementRef};

/// Attributes copied into element references.
const ATTRIBUTE_WHITELIST: &[&str] = &[
    "id", "class", "role", "alt", "title", "href", "type", "name", "tabindex", "lang", "for",
    "disabled",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Maximum live references before the oldest tenth is evicted
    pub capacity: usize,
    /// Visible text is truncated to this many characters
    pub max_text_len: usize,
    /// Ancestor levels included in a stable selector
    pub max_selector_depth: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            max_text_len: 120,
            max_selector_depth: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArenaStats {
    pub entries: usize,
    pub created: u64,
    pub evictions: u64,
}

struct Slot {
    element: Arc<ElementRef>,
    seq: u64,
}

/// Handle-indexed cache of element snapshots.
pub struct ElementRefArena {
    config: ArenaConfig,
    slots: RwLock<HashMap<ElementHandle, Slot>>,
    next_seq: AtomicU64,
    created: AtomicU64,
    evictions: AtomicU64,
}

impl Default for ElementRefArena {
    fn default() -> Self {
        Self::new(ArenaConfig::default())
    }
}

impl ElementRefArena {
    pub fn new(config: ArenaConfig) -> Self {
        Self {
            config,
            slots: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            created: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, handle: ElementHandle) -> Option<Arc<ElementRef>> {
        self.slots.read().get(&handle).map(|s| s.element.clone())
    }

    /// Existing reference for `handle`, or a fresh snapshot from `page`.
    ///
    /// Returns `None` when the page no longer knows the element.
    pub fn get_or_create(
        &self,
        page: &dyn PageModel,
        handle: ElementHandle,
    ) -> Option<Arc<ElementRef>> {
        if let Some(existing) = self.get(handle) {
            return Some(existing);
        }

        let element = Arc::new(self.snapshot(page, handle)?);

        let mut slots = self.slots.write();
        // Another caller may have raced us here; keep the first snapshot
        if let Some(slot) = slots.get(&handle) {
            return Some(slot.element.clone());
        }

        if slots.len() >= self.config.capacity.max(1) {
            self.evict_oldest(&mut slots);
        }

        slots.insert(
            handle,
            Slot {
                element: element.clone(),
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            },
        );
        self.created.fetch_add(1, Ordering::Relaxed);
        Some(element)
    }

    pub fn evict(&self, handle: ElementHandle) -> bool {
        let removed = self.slots.write().remove(&handle).is_some();
        if removed {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// React to a page change. Every event except `Added` invalidates the
    /// snapshot of the affected element.
    pub fn apply(&self, event: &MutationEvent) -> bool {
        match event {
            MutationEvent::Added(_) => false,
            other => self.evict(other.handle()),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    pub fn clear(&self) {
        self.slots.write().clear();
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            entries: self.len(),
            created: self.created.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn evict_oldest(&self, slots: &mut HashMap<ElementHandle, Slot>) {
        let batch = (slots.len() / 10).max(1);

        let mut by_age: Vec<(u64, ElementHandle)> =
            slots.iter().map(|(h, s)| (s.seq, *h)).collect();
        by_age.sort_unstable();

        for (_, handle) in by_age.into_iter().take(batch) {
            slots.remove(&handle);
        }
        self.evictions.fetch_add(batch as u64, Ordering::Relaxed);
        log::debug!("Element arena full, evicted {} oldest references", batch);
    }

    fn snapshot(&self, page: &dyn PageModel, handle: ElementHandle) -> Option<ElementRef> {
        let node = page.node(handle)?;

        let attributes: BTreeMap<String, String> = node
            .attributes
            .iter()
            .filter(|(name, _)| is_whitelisted(name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Some(ElementRef {
            handle,
            selector: stable_selector(page, &node, self.config.max_selector_depth),
            tag: node.tag.clone(),
            attributes,
            text: truncate_text(&node.text, self.config.max_text_len),
            rect: page.bounding_rect(handle).unwrap_or_default(),
        })
    }
}

fn is_whitelisted(name: &str) -> bool {
    name.starts_with("aria-") || ATTRIBUTE_WHITELIST.contains(&name)
}

/// Collapse whitespace and cut to `max` characters.
fn truncate_text(text: &str, max: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max {
        collapsed
    } else {
        collapsed.chars().take(max).collect()
    }
}

fn segment(node: &NodeInfo) -> String {
    if let Some(id) = node.id() {
        return format!("{}#{}", node.tag, id);
    }
    let mut out = node.tag.clone();
    for class in node.classes() {
        out.push('.');
        out.push_str(class);
    }
    out
}

/// `tag#id`, or a `tag.class` chain of ancestors joined by ` > `.
///
/// Stops at the first ancestor with an id, or after `max_depth` levels.
pub fn stable_selector(page: &dyn PageModel, node: &NodeInfo, max_depth: usize) -> String {
    let mut parts = vec![segment(node)];
    if node.id().is_some() {
        return parts.remove(0);
    }

    let mut parent = node.parent;
    while let Some(handle) = parent {
        if parts.len() >= max_depth.max(1) {
            break;
        }
        let Some(ancestor) = page.node(handle) else {
            break;
        };
        parts.push(segment(&ancestor));
        if ancestor.id().is_some() {
            break;
        }
        parent = ancestor.parent;
    }

    parts.reverse();
    parts.join(" > ")
}

//! Trigger-driven re-evaluation.
//!
//! [`ChangeTracker`] listens to page mutations, drops stale element snapshots
//! from the arena and collects the changed handles. On every tick the dirty
//! set is enqueued as one low-priority queue item, so edits are re-checked
//! without competing with caller-initiated evaluations.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::engine::EvaluateOptions;
use crate::page::{ElementRefArena, MutationCallback, MutationEvent, PageModel};
use crate::queue::QueueManager;
use crate::types::ElementHandle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    /// How often dirty elements are flushed to the queue
    #[serde(with = "crate::config::duration_ms")]
    pub interval: Duration,
    /// Queue priority of re-evaluation requests
    pub priority: i32,
    /// Largest number of handles enqueued per flush
    pub max_batch: usize,
    pub options: EvaluateOptions,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_millis(500),
            priority: -1,
            max_batch: 200,
            options: EvaluateOptions::default(),
        }
    }
}

struct Shared {
    arena: Arc<ElementRefArena>,
    dirty: Mutex<BTreeSet<ElementHandle>>,
}

impl Shared {
    fn record(&self, event: &MutationEvent) {
        self.arena.apply(event);
        let mut dirty = self.dirty.lock();
        match event {
            MutationEvent::Removed(handle) => {
                dirty.remove(handle);
            }
            other => {
                dirty.insert(other.handle());
            }
        }
    }
}

pub struct ChangeTracker {
    config: WatchConfig,
    queue: QueueManager,
    shared: Arc<Shared>,
    stop: CancellationToken,
}

impl ChangeTracker {
    pub fn new(config: WatchConfig, arena: Arc<ElementRefArena>, queue: QueueManager) -> Self {
        Self {
            config,
            queue,
            shared: Arc::new(Shared {
                arena,
                dirty: Mutex::new(BTreeSet::new()),
            }),
            stop: CancellationToken::new(),
        }
    }

    /// Subscribe to `page` mutations. Returns false if the host cannot
    /// observe changes.
    pub fn attach(&self, page: &dyn PageModel) -> bool {
        let shared = self.shared.clone();
        let callback: MutationCallback = Arc::new(move |event: &MutationEvent| {
            shared.record(event);
        });

        let attached = page.observe_mutations(callback);
        if !attached {
            log::info!("Page model does not report mutations, re-evaluation disabled");
        }
        attached
    }

    /// Feed an event from a host that delivers changes itself.
    pub fn record(&self, event: &MutationEvent) {
        self.shared.record(event);
    }

    pub fn dirty_count(&self) -> usize {
        self.shared.dirty.lock().len()
    }

    /// Enqueue up to `max_batch` dirty handles. Returns the queue item id.
    pub fn flush(&self) -> Option<String> {
        let handles: Vec<ElementHandle> = {
            let mut dirty = self.shared.dirty.lock();
            let take = self.config.max_batch.max(1).min(dirty.len());
            let batch: Vec<ElementHandle> = dirty.iter().take(take).copied().collect();
            for handle in &batch {
                dirty.remove(handle);
            }
            batch
        };

        if handles.is_empty() {
            return None;
        }

        log::debug!("Re-evaluating {} changed elements", handles.len());
        Some(
            self.queue
                .enqueue(handles, self.config.options.clone(), self.config.priority),
        )
    }

    /// Flush on every interval tick until [`ChangeTracker::stop`].
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            log::info!("Change tracking is disabled, skipping");
            return;
        }

        let tracker = self.clone();
        tokio::spawn(async move {
            let period = tracker.config.interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracker.flush();
                    }
                    _ = tracker.stop.cancelled() => return,
                }
            }
        });
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ColorCache;
    use crate::engine::RuleEngine;
    use crate::page::{ElementSpec, StaticPage};
    use crate::queue::QueueConfig;
    use crate::scheduler::{EvaluationScheduler, FixedMemoryProbe, SchedulerConfig};

    fn tracker(page: Arc<StaticPage>, config: WatchConfig) -> (ChangeTracker, QueueManager) {
        let arena = Arc::new(ElementRefArena::default());
        let scheduler = EvaluationScheduler::new(
            SchedulerConfig::default(),
            Arc::new(RuleEngine::with_builtin_rules().unwrap()),
            page,
            Arc::new(ColorCache::default()),
            arena.clone(),
            Arc::new(FixedMemoryProbe::new(0)),
        );
        let queue = QueueManager::new(QueueConfig::default(), Arc::new(scheduler));
        (ChangeTracker::new(config, arena, queue.clone()), queue)
    }

    #[tokio::test]
    async fn test_mutations_mark_dirty() {
        let page = Arc::new(StaticPage::new());
        let (tracker, _) = tracker(page.clone(), WatchConfig::default());
        assert!(tracker.attach(page.as_ref()));

        let a = page.append(None, ElementSpec::new("img"));
        let b = page.append(None, ElementSpec::new("button"));
        page.set_attribute(a, "alt", "Logo");
        assert_eq!(tracker.dirty_count(), 2);

        page.remove(b);
        assert_eq!(tracker.dirty_count(), 1);
    }

    #[tokio::test]
    async fn test_flush_enqueues_low_priority_item() {
        let page = Arc::new(StaticPage::new());
        let config = WatchConfig {
            max_batch: 2,
            ..WatchConfig::default()
        };
        let (tracker, queue) = tracker(page.clone(), config);
        tracker.attach(page.as_ref());

        for _ in 0..3 {
            page.append(None, ElementSpec::new("img"));
        }

        let id = tracker.flush().unwrap();
        let item = queue.status(&id).unwrap();
        assert_eq!(item.priority, -1);
        assert_eq!(item.elements.len(), 2);
        assert_eq!(tracker.dirty_count(), 1);

        queue.drain().await;
        assert!(tracker.flush().is_some());
        assert!(tracker.flush().is_none());
    }
}

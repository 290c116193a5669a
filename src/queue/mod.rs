//! # Queue Manager
//!
//! Admits many independent evaluation requests and runs at most
//! `max_concurrent` of them at once, highest priority first.
//!
//! ## Processing pass
//!
//! Enqueues schedule a debounced pass; enqueues inside the debounce window
//! coalesce into one pass. A pass takes pending items by descending priority
//! (enqueue order on ties) until the concurrency ceiling is reached and
//! spawns each one. Every finished item schedules another pass, so the queue
//! keeps draining while anything is pending.
//!
//! ## Isolation
//!
//! Each item's evaluation runs in its own task. An error or a panic marks
//! only that item `Error` and fires the error callback.
//!
//! ## Retention
//!
//! Finished items stay queryable for the retention window, then are
//! deleted. Cancelling only works while an item is still pending; in-flight
//! work is cancelled through the scheduler.

pub mod item;

pub use item::{ItemStatus, QueueItem, QueueStats};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::engine::EvaluateOptions;
use crate::error::SweepError;
use crate::scheduler::{ChunkProgress, EvaluationReport, EvaluationScheduler, ProgressCallback};
use crate::types::{now_ms, ElementHandle};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    /// Window in which repeated enqueues coalesce into one pass
    #[serde(with = "crate::config::duration_ms")]
    pub debounce: Duration,
    /// How long finished items remain queryable
    #[serde(with = "crate::config::duration_ms")]
    pub retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            debounce: Duration::from_millis(10),
            retention: Duration::from_secs(5),
        }
    }
}

pub type CompleteCallback = Arc<dyn Fn(&QueueItem) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&QueueItem, &SweepError) + Send + Sync>;
pub type ItemProgressCallback = Arc<dyn Fn(&str, f64) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    complete: Vec<CompleteCallback>,
    error: Vec<ErrorCallback>,
    progress: Vec<ItemProgressCallback>,
}

struct Inner {
    config: QueueConfig,
    scheduler: Arc<EvaluationScheduler>,
    items: Mutex<HashMap<String, QueueItem>>,
    next_seq: AtomicU64,
    next_start: AtomicU64,
    peak_processing: AtomicUsize,
    pass_scheduled: AtomicBool,
    callbacks: RwLock<Callbacks>,
    idle: Notify,
}

/// Priority queue of evaluation requests.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<Inner>,
}

impl QueueManager {
    pub fn new(config: QueueConfig, scheduler: Arc<EvaluationScheduler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                scheduler,
                items: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
                next_start: AtomicU64::new(0),
                peak_processing: AtomicUsize::new(0),
                pass_scheduled: AtomicBool::new(false),
                callbacks: RwLock::new(Callbacks::default()),
                idle: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Add a request in `Pending` and schedule a processing pass.
    ///
    /// Must be called within a tokio runtime.
    pub fn enqueue(
        &self,
        elements: Vec<ElementHandle>,
        options: EvaluateOptions,
        priority: i32,
    ) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);

        let item = QueueItem::new(id.clone(), seq, elements, options, priority, now_ms());
        log::debug!(
            "Enqueued {} (priority {}, {} elements)",
            id,
            priority,
            item.elements.len()
        );
        self.inner.items.lock().insert(id.clone(), item);

        schedule_pass(&self.inner);
        id
    }

    pub fn status(&self, id: &str) -> Option<QueueItem> {
        self.inner.items.lock().get(id).cloned()
    }

    /// Remove a still-pending item. Returns false once it has started.
    pub fn cancel(&self, id: &str) -> bool {
        let removed = {
            let mut items = self.inner.items.lock();
            let pending = items
                .get(id)
                .is_some_and(|item| item.status == ItemStatus::Pending);
            pending && items.remove(id).is_some()
        };

        if removed {
            log::debug!("Cancelled pending item {}", id);
            self.inner.notify_if_idle();
        }
        removed
    }

    pub fn on_complete(&self, callback: CompleteCallback) {
        self.inner.callbacks.write().complete.push(callback);
    }

    pub fn on_error(&self, callback: ErrorCallback) {
        self.inner.callbacks.write().error.push(callback);
    }

    pub fn on_progress(&self, callback: ItemProgressCallback) {
        self.inner.callbacks.write().progress.push(callback);
    }

    pub fn stats(&self) -> QueueStats {
        let items = self.inner.items.lock();
        let mut stats = QueueStats {
            total: items.len(),
            peak_processing: self.inner.peak_processing.load(Ordering::Relaxed),
            ..QueueStats::default()
        };
        for item in items.values() {
            match item.status {
                ItemStatus::Pending => stats.pending += 1,
                ItemStatus::Processing => stats.processing += 1,
                ItemStatus::Complete => stats.complete += 1,
                ItemStatus::Error => stats.error += 1,
            }
        }
        stats
    }

    /// Wait until nothing is pending or processing.
    pub async fn drain(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

impl Inner {
    fn is_idle(&self) -> bool {
        self.items
            .lock()
            .values()
            .all(|item| item.status.is_finished())
    }

    fn notify_if_idle(&self) {
        if self.is_idle() {
            self.idle.notify_waiters();
        }
    }

    fn report_progress(&self, id: &str, progress: ChunkProgress) {
        let fraction = progress.fraction();
        if let Some(item) = self.items.lock().get_mut(id) {
            item.progress = fraction;
        }
        let callbacks = self.callbacks.read().progress.clone();
        for cb in callbacks {
            cb(id, fraction);
        }
    }

    fn finish(&self, id: &str, outcome: Result<EvaluationReport, SweepError>) {
        let finished = {
            let mut items = self.items.lock();
            let Some(item) = items.get_mut(id) else {
                return;
            };
            item.finished_at = Some(now_ms());
            match &outcome {
                Ok(report) => {
                    item.status = ItemStatus::Complete;
                    item.progress = 1.0;
                    item.report = Some(Arc::new(report.clone()));
                }
                Err(e) => {
                    item.status = ItemStatus::Error;
                    item.error = Some(e.to_string());
                }
            }
            item.clone()
        };

        match outcome {
            Ok(_) => {
                log::info!(
                    "Queue item {} complete with {} results",
                    id,
                    finished.result_count()
                );
                let callbacks = self.callbacks.read().complete.clone();
                for cb in callbacks {
                    guarded(id, "complete", || cb(&finished));
                }
            }
            Err(e) => {
                log::warn!("Queue item {} failed: {}", id, e);
                let callbacks = self.callbacks.read().error.clone();
                for cb in callbacks {
                    guarded(id, "error", || cb(&finished, &e));
                }
            }
        }
    }
}

/// Run a user callback; a panic is logged and the item still settles.
fn guarded(id: &str, kind: &str, callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        log::error!("Queue {} callback panicked for item {}", kind, id);
    }
}

/// Schedule a debounced pass unless one is already waiting.
fn schedule_pass(inner: &Arc<Inner>) {
    if inner.pass_scheduled.swap(true, Ordering::AcqRel) {
        return;
    }

    let inner = inner.clone();
    tokio::spawn(async move {
        tokio::time::sleep(inner.config.debounce).await;
        inner.pass_scheduled.store(false, Ordering::Release);
        run_pass(&inner);
    });
}

fn run_pass(inner: &Arc<Inner>) {
    let max = inner.config.max_concurrent.max(1);

    let (started, pending_left) = {
        let mut items = inner.items.lock();
        let processing = items
            .values()
            .filter(|i| i.status == ItemStatus::Processing)
            .count();
        let slots = max.saturating_sub(processing);

        let mut pending: Vec<(i32, u64, String)> = items
            .values()
            .filter(|i| i.status == ItemStatus::Pending)
            .map(|i| (i.priority, i.seq, i.id.clone()))
            .collect();
        pending.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut started = Vec::new();
        for (_, _, id) in pending.iter().take(slots) {
            if let Some(item) = items.get_mut(id) {
                item.status = ItemStatus::Processing;
                item.started_at = Some(now_ms());
                item.start_order = Some(inner.next_start.fetch_add(1, Ordering::Relaxed));
                started.push((
                    item.id.clone(),
                    item.elements.clone(),
                    item.options.clone(),
                ));
            }
        }

        inner
            .peak_processing
            .fetch_max(processing + started.len(), Ordering::Relaxed);
        let left = pending.len() - started.len();
        (started, left)
    };

    if !started.is_empty() {
        log::debug!(
            "Queue pass started {} items, {} still pending",
            started.len(),
            pending_left
        );
    }

    for (id, elements, options) in started {
        spawn_item(inner.clone(), id, elements, options);
    }
}

fn spawn_item(
    inner: Arc<Inner>,
    id: String,
    elements: Arc<Vec<ElementHandle>>,
    options: Arc<EvaluateOptions>,
) {
    tokio::spawn(async move {
        let scheduler = inner.scheduler.clone();
        let progress_inner = inner.clone();
        let progress_id = id.clone();

        // Inner task so a panic surfaces as a JoinError for this item only
        let run = tokio::spawn(async move {
            let progress: ProgressCallback = Arc::new(move |p: ChunkProgress| {
                progress_inner.report_progress(&progress_id, p);
            });
            scheduler
                .evaluate_with(
                    &elements,
                    options.as_ref().clone(),
                    CancellationToken::new(),
                    Some(progress),
                )
                .await
        });

        let outcome = match run.await {
            Ok(result) => result,
            Err(e) => Err(SweepError::QueueItem(format!("evaluation task failed: {}", e))),
        };

        inner.finish(&id, outcome);
        schedule_retention(&inner, id);

        schedule_pass(&inner);
        inner.notify_if_idle();
    });
}

fn schedule_retention(inner: &Arc<Inner>, id: String) {
    let inner = inner.clone();
    tokio::spawn(async move {
        tokio::time::sleep(inner.config.retention).await;
        if inner.items.lock().remove(&id).is_some() {
            log::debug!("Queue item {} expired", id);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ColorCache;
    use crate::engine::RuleEngine;
    use crate::page::{ElementRefArena, ElementSpec, StaticPage};
    use crate::scheduler::{FixedMemoryProbe, SchedulerConfig};

    fn queue(config: QueueConfig) -> (QueueManager, Vec<ElementHandle>) {
        let page = Arc::new(StaticPage::new());
        let handles = (0..5)
            .map(|i| page.append(None, ElementSpec::new("img").attr("id", &format!("i{}", i))))
            .collect();

        let scheduler = EvaluationScheduler::new(
            SchedulerConfig::default(),
            Arc::new(RuleEngine::with_builtin_rules().unwrap()),
            page,
            Arc::new(ColorCache::default()),
            Arc::new(ElementRefArena::default()),
            Arc::new(FixedMemoryProbe::new(0)),
        );
        (QueueManager::new(config, Arc::new(scheduler)), handles)
    }

    #[tokio::test]
    async fn test_enqueue_runs_to_completion() {
        let (queue, handles) = queue(QueueConfig::default());
        let completed = Arc::new(Mutex::new(Vec::new()));
        let sink = completed.clone();
        queue.on_complete(Arc::new(move |item: &QueueItem| {
            sink.lock().push(item.result_count());
        }));

        let id = queue.enqueue(handles, EvaluateOptions::default(), 1);
        assert_eq!(queue.status(&id).unwrap().status, ItemStatus::Pending);

        queue.drain().await;

        let item = queue.status(&id).unwrap();
        assert_eq!(item.status, ItemStatus::Complete);
        assert_eq!(item.progress, 1.0);
        assert_eq!(*completed.lock(), vec![5]);
    }

    #[tokio::test]
    async fn test_cancel_only_while_pending() {
        let (queue, handles) = queue(QueueConfig::default());
        let id = queue.enqueue(handles.clone(), EvaluateOptions::default(), 1);
        assert!(queue.cancel(&id));
        assert!(queue.status(&id).is_none());

        let id = queue.enqueue(handles, EvaluateOptions::default(), 1);
        queue.drain().await;
        assert!(!queue.cancel(&id));
    }

    #[tokio::test]
    async fn test_invalid_options_mark_only_that_item() {
        let (queue, handles) = queue(QueueConfig::default());
        let errors = Arc::new(Mutex::new(0));
        let sink = errors.clone();
        queue.on_error(Arc::new(move |_item: &QueueItem, _e: &SweepError| {
            *sink.lock() += 1;
        }));

        let bad = queue.enqueue(
            handles.clone(),
            EvaluateOptions {
                sample_limit: 0,
                ..EvaluateOptions::default()
            },
            9,
        );
        let good = queue.enqueue(handles, EvaluateOptions::default(), 1);
        queue.drain().await;

        assert_eq!(queue.status(&bad).unwrap().status, ItemStatus::Error);
        assert!(queue.status(&bad).unwrap().error.is_some());
        assert_eq!(queue.status(&good).unwrap().status, ItemStatus::Complete);
        assert_eq!(*errors.lock(), 1);

        let stats = queue.stats();
        assert_eq!((stats.complete, stats.error, stats.pending), (1, 1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_items_expire_after_retention() {
        let (queue, handles) = queue(QueueConfig::default());
        let id = queue.enqueue(handles, EvaluateOptions::default(), 1);
        queue.drain().await;
        assert!(queue.status(&id).is_some());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(queue.status(&id).is_none());
        assert_eq!(queue.stats().total, 0);
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_stall_drain() {
        let (queue, handles) = queue(QueueConfig::default());
        let completed = Arc::new(AtomicUsize::new(0));
        let sink = completed.clone();
        queue.on_complete(Arc::new(|_item: &QueueItem| panic!("listener bug")));
        queue.on_complete(Arc::new(move |_item: &QueueItem| {
            sink.fetch_add(1, Ordering::Relaxed);
        }));

        let first = queue.enqueue(handles.clone(), EvaluateOptions::default(), 1);
        let second = queue.enqueue(handles, EvaluateOptions::default(), 1);
        tokio::time::timeout(Duration::from_secs(5), queue.drain())
            .await
            .expect("drain stalled");

        assert_eq!(queue.status(&first).unwrap().status, ItemStatus::Complete);
        assert_eq!(queue.status(&second).unwrap().status, ItemStatus::Complete);
        assert_eq!(completed.load(Ordering::Relaxed), 2);
    }
}

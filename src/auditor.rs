use std::sync::Arc;

use crate::color::{CacheStats, ColorCache};
use crate::config::SweepConfig;
use crate::engine::{EngineStats, EvaluateOptions, Plugin, RuleEngine};
use crate::error::{Result, SweepError};
use crate::page::{ArenaStats, ElementRefArena, PageModel};
use crate::queue::{QueueItem, QueueManager, QueueStats};
use crate::scheduler::{EvaluationReport, EvaluationScheduler, MemoryProbe, ProcessMemoryProbe};
use crate::transport::{StreamingTransport, TransportStats};
use crate::types::{now_ms, ElementHandle};
use crate::watch::ChangeTracker;

// ================================================================================================
// AUDITOR STRUCTURE
// ================================================================================================

/// Root of one evaluation session.
///
/// Owns every subsystem for a single page: the rule engine, the color cache,
/// the element arena, the scheduler, the queue, the change tracker and the
/// optional streaming transport.
///
/// # Wiring
/// - Finished queue items push their results and a `complete` message to
///   the transport
/// - Queue item failures become `error` messages
/// - Queue progress becomes `progress` messages
/// - Page mutations feed the change tracker, which re-enqueues changed
///   elements at low priority
pub struct Auditor {
    config: SweepConfig,
    page: Arc<dyn PageModel>,
    engine: Arc<RuleEngine>,
    colors: Arc<ColorCache>,
    arena: Arc<ElementRefArena>,
    scheduler: Arc<EvaluationScheduler>,
    queue: QueueManager,
    tracker: Arc<ChangeTracker>,
    transport: Option<StreamingTransport>,
    created_at: u64,
}

#[derive(Debug, Clone)]
pub struct AuditorStats {
    pub engine: EngineStats,
    pub queue: QueueStats,
    pub cache: CacheStats,
    pub arena: ArenaStats,
    pub transport: Option<TransportStats>,
    pub active_evaluations: usize,
    pub uptime_ms: u64,
}

impl Auditor {
    /// Session with the built-in rules, a process memory probe and, when
    /// `config.streaming` is set, an HTTP transport.
    pub fn new(config: SweepConfig, page: Arc<dyn PageModel>) -> Result<Self> {
        let engine = Arc::new(RuleEngine::with_builtin_rules()?);
        let transport = if config.streaming {
            Some(StreamingTransport::http(config.transport.clone())?)
        } else {
            None
        };
        Self::with_parts(
            config,
            page,
            engine,
            Arc::new(ProcessMemoryProbe::new()),
            transport,
        )
    }

    /// Session built from caller-supplied parts.
    pub fn with_parts(
        config: SweepConfig,
        page: Arc<dyn PageModel>,
        engine: Arc<RuleEngine>,
        memory: Arc<dyn MemoryProbe>,
        transport: Option<StreamingTransport>,
    ) -> Result<Self> {
        config.validate()?;

        let colors = Arc::new(ColorCache::new(config.cache.clone()));
        let arena = Arc::new(ElementRefArena::new(config.arena.clone()));
        let scheduler = Arc::new(EvaluationScheduler::new(
            config.scheduler.clone(),
            engine.clone(),
            page.clone(),
            colors.clone(),
            arena.clone(),
            memory,
        ));
        let queue = QueueManager::new(config.queue.clone(), scheduler.clone());
        let tracker = Arc::new(ChangeTracker::new(
            config.watch.clone(),
            arena.clone(),
            queue.clone(),
        ));

        if let Some(transport) = &transport {
            wire_transport(&queue, transport);
        }

        log::info!(
            "Auditor ready: {} rules, streaming {}",
            engine.rule_ids().len(),
            if transport.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            config,
            page,
            engine,
            colors,
            arena,
            scheduler,
            queue,
            tracker,
            transport,
            created_at: now_ms(),
        })
    }

    /// Connect the transport and start change tracking.
    pub async fn start(&self) {
        if let Some(transport) = &self.transport {
            transport.start().await;
        }
        if self.config.watch.enabled && self.tracker.attach(self.page.as_ref()) {
            self.tracker.start();
        }
    }

    /// Evaluate `elements` now, bypassing the queue.
    ///
    /// Results are also pushed to the transport when streaming.
    pub async fn evaluate(
        &self,
        elements: &[ElementHandle],
        options: EvaluateOptions,
    ) -> Result<EvaluationReport> {
        let report = self.scheduler.evaluate(elements, options).await?;
        self.emit(&report);
        Ok(report)
    }

    pub async fn evaluate_selector(
        &self,
        selector: &str,
        options: EvaluateOptions,
    ) -> Result<EvaluationReport> {
        let report = self.scheduler.evaluate_selector(selector, options).await?;
        self.emit(&report);
        Ok(report)
    }

    /// Queue a request. Returns the queue item id.
    pub fn enqueue(
        &self,
        elements: Vec<ElementHandle>,
        options: EvaluateOptions,
        priority: i32,
    ) -> String {
        self.queue.enqueue(elements, options, priority)
    }

    pub fn status(&self, id: &str) -> Option<QueueItem> {
        self.queue.status(id)
    }

    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        self.engine.register_plugin(plugin)
    }

    /// Abort every in-flight evaluation.
    pub fn cancel_all(&self) -> usize {
        self.scheduler.cancel_all()
    }

    pub fn stats(&self) -> AuditorStats {
        AuditorStats {
            engine: self.engine.stats(),
            queue: self.queue.stats(),
            cache: self.colors.stats(),
            arena: self.arena.stats(),
            transport: self.transport.as_ref().map(|t| t.stats()),
            active_evaluations: self.scheduler.active_count(),
            uptime_ms: now_ms().saturating_sub(self.created_at),
        }
    }

    pub async fn shutdown(&self) {
        self.tracker.stop();
        let cancelled = self.cancel_all();
        if let Some(transport) = &self.transport {
            transport.shutdown().await;
        }
        log::info!("Auditor shut down, {} evaluations cancelled", cancelled);
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    pub fn colors(&self) -> &Arc<ColorCache> {
        &self.colors
    }

    pub fn arena(&self) -> &Arc<ElementRefArena> {
        &self.arena
    }

    pub fn scheduler(&self) -> &Arc<EvaluationScheduler> {
        &self.scheduler
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }

    pub fn transport(&self) -> Option<&StreamingTransport> {
        self.transport.as_ref()
    }

    fn emit(&self, report: &EvaluationReport) {
        if let Some(transport) = &self.transport {
            transport.push(report.results.clone());
            transport.send_complete(report);
        }
    }
}

fn wire_transport(queue: &QueueManager, transport: &StreamingTransport) {
    let sink = transport.clone();
    queue.on_complete(Arc::new(move |item: &QueueItem| {
        if let Some(report) = &item.report {
            sink.push(report.results.clone());
            sink.send_complete(report);
        }
    }));

    let sink = transport.clone();
    queue.on_error(Arc::new(move |item: &QueueItem, err: &SweepError| {
        sink.send_error(&err.to_string(), Some(&item.id));
    }));

    let sink = transport.clone();
    queue.on_progress(Arc::new(move |id: &str, fraction: f64| {
        sink.send_progress(id, fraction);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{ElementSpec, StaticPage};
    use crate::scheduler::FixedMemoryProbe;
    use crate::transport::{Channel, MessageType, TransportConfig, WireMessage};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        messages: Mutex<Vec<WireMessage>>,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn send(&self, message: &WireMessage) -> Result<()> {
            self.messages.lock().push(message.clone());
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn page() -> Arc<StaticPage> {
        let page = Arc::new(StaticPage::new());
        page.append(None, ElementSpec::new("img").attr("id", "logo"));
        page.append(
            None,
            ElementSpec::new("p")
                .text("Faint")
                .color("#aaaaaa")
                .background("#ffffff"),
        );
        page
    }

    #[tokio::test]
    async fn test_evaluate_without_transport() {
        let auditor = Auditor::with_parts(
            SweepConfig::default(),
            page(),
            Arc::new(RuleEngine::with_builtin_rules().unwrap()),
            Arc::new(FixedMemoryProbe::new(0)),
            None,
        )
        .unwrap();

        let report = auditor
            .evaluate_selector("*", EvaluateOptions::default())
            .await
            .unwrap();
        let rules: Vec<&str> = report.results.iter().map(|r| r.rule_id.as_str()).collect();
        assert!(rules.contains(&"image-alt"));
        assert!(rules.contains(&"color-contrast"));
        assert_eq!(auditor.stats().arena.entries, 2);
    }

    #[tokio::test]
    async fn test_queue_completion_streams_results() {
        let channel = Arc::new(RecordingChannel::default());
        let transport = StreamingTransport::new(TransportConfig::default(), channel.clone());
        let page = page();
        let handles = page.handles();

        let auditor = Auditor::with_parts(
            SweepConfig::default(),
            page,
            Arc::new(RuleEngine::with_builtin_rules().unwrap()),
            Arc::new(FixedMemoryProbe::new(0)),
            Some(transport.clone()),
        )
        .unwrap();
        auditor.start().await;

        auditor.enqueue(handles, EvaluateOptions::default(), 1);
        auditor.queue().drain().await;
        transport.flush().await.unwrap();

        let kinds: Vec<MessageType> = channel.messages.lock().iter().map(|m| m.kind).collect();
        assert!(kinds.contains(&MessageType::Evaluation));
        assert!(kinds.contains(&MessageType::Complete));
        assert!(kinds.contains(&MessageType::Progress));

        auditor.shutdown().await;
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = SweepConfig::default();
        config.queue.max_concurrent = 0;
        let err = Auditor::with_parts(
            config,
            Arc::new(StaticPage::new()),
            Arc::new(RuleEngine::new()),
            Arc::new(FixedMemoryProbe::new(0)),
            None,
        )
        .err()
        .unwrap();
        assert!(matches!(err, SweepError::Config(_)));
    }
}

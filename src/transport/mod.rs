//! # Streaming Transport
//!
//! Delivers evaluation results to a remote collector without blocking
//! evaluation and without losing batches across transient failures.
//!
//! ## Batching
//!
//! Results accumulate in a send buffer. A batch is cut as soon as the buffer
//! holds `batch_size` results, or when the debounce interval elapses after
//! the first buffered result, whichever comes first. Batches whose JSON
//! payload exceeds `compression_threshold` bytes are gzipped and base64
//! encoded. Progress, complete and error messages cut whatever is buffered
//! first, so they never overtake results emitted before them.
//!
//! ## Delivery
//!
//! Messages wait in a FIFO pending queue and are sent one at a time. A failed
//! send puts the message back at the front and schedules a reconnect, so
//! order is preserved and nothing is sent twice.
//!
//! ## Reconnect
//!
//! Attempt `n` waits `min(initial * multiplier^(n-1), max_delay)` before
//! reconnecting. The attempt counter only resets after a message is
//! actually delivered. Once `max_attempts` is exceeded the transport is
//! permanently disconnected and error callbacks fire.

pub mod backoff;
pub mod channel;
pub mod compress;
pub mod message;

pub use backoff::BackoffConfig;
pub use channel::{Channel, HttpChannel};
pub use message::{
    BatchMetrics, BatchSummary, CompletePayload, ErrorPayload, EvaluationPayload, HealthPayload,
    HealthStatus, MessageType, ProgressPayload, WireMessage,
};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SweepError};
use crate::scheduler::EvaluationReport;
use crate::types::EvaluationResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Collector endpoint used by [`HttpChannel`]
    pub collector_url: Option<String>,
    /// Results per batch
    pub batch_size: usize,
    /// Debounce before a partial batch is flushed
    #[serde(with = "crate::config::duration_ms")]
    pub batch_interval: Duration,
    /// Payloads larger than this many bytes are compressed
    pub compression_threshold: usize,
    #[serde(with = "crate::config::duration_ms")]
    pub heartbeat_interval: Duration,
    /// Pending messages above which a connected transport reports degraded
    pub degraded_backlog: usize,
    #[serde(with = "crate::config::duration_ms")]
    pub request_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            collector_url: None,
            batch_size: 50,
            batch_interval: Duration::from_millis(100),
            compression_threshold: 4 * 1024,
            heartbeat_interval: Duration::from_secs(30),
            degraded_backlog: 10,
            request_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Reconnecting,
    /// Reconnect attempts exhausted; nothing more is sent
    PermanentlyDisconnected,
}

pub type TransportErrorCallback = Arc<dyn Fn(&SweepError) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub batches_built: u64,
    pub compressed_batches: u64,
    pub results_sent: u64,
}

struct SendState {
    buffer: Vec<EvaluationResult>,
    pending: VecDeque<WireMessage>,
    /// Result ids already emitted, for the new-vs-seen summary
    seen: HashSet<String>,
    connection: ConnectionState,
    attempts: u32,
}

struct Inner {
    config: TransportConfig,
    channel: Arc<dyn Channel>,
    state: Mutex<SendState>,
    sequence: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    batches: AtomicU64,
    compressed: AtomicU64,
    results_sent: AtomicU64,
    flush_scheduled: AtomicBool,
    reconnect_scheduled: AtomicBool,
    /// Serializes deliveries so pending order is kept
    delivering: tokio::sync::Mutex<()>,
    error_callbacks: RwLock<Vec<TransportErrorCallback>>,
    started: Instant,
    shutdown: CancellationToken,
}

/// Batched, retrying result emitter.
///
/// Cheap to clone; clones share the same buffers and connection.
#[derive(Clone)]
pub struct StreamingTransport {
    inner: Arc<Inner>,
}

impl StreamingTransport {
    pub fn new(config: TransportConfig, channel: Arc<dyn Channel>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                channel,
                state: Mutex::new(SendState {
                    buffer: Vec::new(),
                    pending: VecDeque::new(),
                    seen: HashSet::new(),
                    connection: ConnectionState::Disconnected,
                    attempts: 0,
                }),
                sequence: AtomicU64::new(0),
                sent: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                batches: AtomicU64::new(0),
                compressed: AtomicU64::new(0),
                results_sent: AtomicU64::new(0),
                flush_scheduled: AtomicBool::new(false),
                reconnect_scheduled: AtomicBool::new(false),
                delivering: tokio::sync::Mutex::new(()),
                error_callbacks: RwLock::new(Vec::new()),
                started: Instant::now(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Transport over [`HttpChannel`] posting to `config.collector_url`.
    pub fn http(config: TransportConfig) -> Result<Self> {
        let url = config
            .collector_url
            .clone()
            .ok_or_else(|| SweepError::Config("collector_url is not set".to_string()))?;
        let channel = HttpChannel::new(&url, config.request_timeout)?;
        Ok(Self::new(config, Arc::new(channel)))
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Connect and start the heartbeat loop.
    ///
    /// A failed first connect is not an error; it enters the reconnect loop.
    pub async fn start(&self) {
        match self.inner.channel.connect().await {
            Ok(()) => {
                self.inner.state.lock().connection = ConnectionState::Connected;
                log::info!("Transport connected");
            }
            Err(e) => {
                log::warn!("Transport connect failed: {}", e);
                schedule_reconnect(&self.inner);
            }
        }
        spawn_heartbeat(&self.inner);
        spawn_delivery(&self.inner);
    }

    /// Buffer results for emission.
    pub fn push(&self, results: Vec<EvaluationResult>) {
        if results.is_empty() {
            return;
        }

        let (cut, leftover) = {
            let mut state = self.inner.state.lock();
            state.buffer.extend(results);
            let size = self.inner.config.batch_size.max(1);
            let mut cut = false;
            while state.buffer.len() >= size {
                let rest = state.buffer.split_off(size);
                let batch = std::mem::replace(&mut state.buffer, rest);
                enqueue_batch(&self.inner, &mut state, batch);
                cut = true;
            }
            (cut, !state.buffer.is_empty())
        };

        if leftover {
            schedule_flush(&self.inner);
        }
        if cut {
            spawn_delivery(&self.inner);
        }
    }

    pub fn send_progress(&self, run_id: &str, fraction: f64) {
        let payload = ProgressPayload {
            run_id: run_id.to_string(),
            fraction,
        };
        self.send_control(MessageType::Progress, &payload);
    }

    pub fn send_complete(&self, report: &EvaluationReport) {
        let payload = CompletePayload {
            run_id: report.run_id.clone(),
            state: report.state,
            total_results: report.results.len(),
            duration_ms: report.duration_ms,
        };
        self.send_control(MessageType::Complete, &payload);
    }

    pub fn send_error(&self, message: &str, run_id: Option<&str>) {
        let payload = ErrorPayload {
            message: message.to_string(),
            run_id: run_id.map(str::to_string),
        };
        self.send_control(MessageType::Error, &payload);
    }

    fn send_control<T: Serialize>(&self, kind: MessageType, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(value) => {
                {
                    let mut state = self.inner.state.lock();
                    // Buffered results go out ahead of the control message
                    cut_locked(&self.inner, &mut state);
                    state.pending.push_back(WireMessage::new(kind, value));
                }
                spawn_delivery(&self.inner);
            }
            Err(e) => log::warn!("Dropping {:?} message: {}", kind, e),
        }
    }

    /// Cut a batch from whatever is buffered and try to deliver everything
    /// pending now.
    ///
    /// Returns `TransportExhausted` once the transport has given up.
    pub async fn flush(&self) -> Result<()> {
        cut_buffer(&self.inner);
        deliver_pending(&self.inner).await;

        let state = self.inner.state.lock();
        if state.connection == ConnectionState::PermanentlyDisconnected {
            return Err(SweepError::TransportExhausted {
                attempts: self.inner.config.backoff.max_attempts,
            });
        }
        Ok(())
    }

    pub fn on_error(&self, callback: TransportErrorCallback) {
        self.inner.error_callbacks.write().push(callback);
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().connection
    }

    /// Sequence number of the last evaluation batch built.
    pub fn sequence(&self) -> u64 {
        self.inner.sequence.load(Ordering::Relaxed)
    }

    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn buffered_len(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            messages_sent: self.inner.sent.load(Ordering::Relaxed),
            messages_failed: self.inner.failed.load(Ordering::Relaxed),
            batches_built: self.inner.batches.load(Ordering::Relaxed),
            compressed_batches: self.inner.compressed.load(Ordering::Relaxed),
            results_sent: self.inner.results_sent.load(Ordering::Relaxed),
        }
    }

    pub fn health(&self) -> HealthPayload {
        self.inner.health()
    }

    /// Stop background loops, make a last delivery attempt and disconnect.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        cut_buffer(&self.inner);
        deliver_pending(&self.inner).await;
        self.inner.channel.disconnect().await;

        let left = self.pending_len();
        if left > 0 {
            log::warn!("Transport shut down with {} undelivered messages", left);
        } else {
            log::info!("Transport shut down");
        }
    }
}

impl Inner {
    fn health(&self) -> HealthPayload {
        let state = self.state.lock();
        let status = match state.connection {
            ConnectionState::Connected if state.pending.len() > self.config.degraded_backlog => {
                HealthStatus::Degraded
            }
            ConnectionState::Connected => HealthStatus::Healthy,
            _ => HealthStatus::Unhealthy,
        };

        HealthPayload {
            status,
            uptime_ms: self.started.elapsed().as_millis() as u64,
            messages_sent: self.sent.load(Ordering::Relaxed),
            messages_failed: self.failed.load(Ordering::Relaxed),
            batches_pending: state.pending.len(),
            results_buffered: state.buffer.len(),
            reconnect_attempts: state.attempts,
        }
    }

    fn give_up(&self) {
        let attempts = {
            let mut state = self.state.lock();
            state.connection = ConnectionState::PermanentlyDisconnected;
            state.attempts
        };
        let err = SweepError::TransportExhausted {
            attempts: attempts.saturating_sub(1),
        };
        log::error!("{}", err);

        let callbacks = self.error_callbacks.read().clone();
        for cb in callbacks {
            cb(&err);
        }
    }
}

// ================================================================================================
// BATCHING
// ================================================================================================

fn schedule_flush(inner: &Arc<Inner>) {
    if inner.flush_scheduled.swap(true, Ordering::AcqRel) {
        return;
    }

    let inner = inner.clone();
    tokio::spawn(async move {
        tokio::time::sleep(inner.config.batch_interval).await;
        inner.flush_scheduled.store(false, Ordering::Release);
        if cut_buffer(&inner) {
            deliver_pending(&inner).await;
        }
    });
}

/// Move the whole buffer into a pending batch. Returns false if it was empty.
fn cut_buffer(inner: &Inner) -> bool {
    let mut state = inner.state.lock();
    cut_locked(inner, &mut state)
}

fn cut_locked(inner: &Inner, state: &mut SendState) -> bool {
    if state.buffer.is_empty() {
        return false;
    }
    let batch = std::mem::take(&mut state.buffer);
    enqueue_batch(inner, state, batch);
    true
}

/// Sequence numbers are assigned under the state lock, so pending batches
/// are always in sequence order.
fn enqueue_batch(inner: &Inner, state: &mut SendState, results: Vec<EvaluationResult>) {
    match build_batch(inner, state, results) {
        Ok(message) => state.pending.push_back(message),
        Err(e) => log::error!("Failed to build result batch: {}", e),
    }
}

fn build_batch(
    inner: &Inner,
    state: &mut SendState,
    results: Vec<EvaluationResult>,
) -> Result<WireMessage> {
    let started = Instant::now();
    let summary = BatchSummary::build(&results, &mut state.seen);
    let queued = state.pending.len();

    let result_bytes = serde_json::to_vec(&results)?.len();
    let sequence = inner.sequence.fetch_add(1, Ordering::Relaxed) + 1;
    let count = results.len();

    let payload = EvaluationPayload {
        sequence,
        results,
        summary,
        metrics: BatchMetrics {
            payload_bytes: result_bytes,
            queued_batches: queued,
            build_us: started.elapsed().as_micros() as u64,
        },
    };

    let body = serde_json::to_vec(&payload)?;
    inner.batches.fetch_add(1, Ordering::Relaxed);

    let message = if body.len() > inner.config.compression_threshold {
        let encoded = compress::gzip_base64(&body)?;
        inner.compressed.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Batch {} compressed {} -> {} bytes",
            sequence,
            body.len(),
            encoded.len()
        );
        let mut message =
            WireMessage::new(MessageType::Evaluation, serde_json::Value::String(encoded));
        message.compressed = Some(true);
        message
    } else {
        WireMessage::new(MessageType::Evaluation, serde_json::to_value(&payload)?)
    };

    log::debug!("Built batch {} with {} results", sequence, count);
    Ok(message)
}

// ================================================================================================
// DELIVERY
// ================================================================================================

fn spawn_delivery(inner: &Arc<Inner>) {
    let inner = inner.clone();
    tokio::spawn(async move {
        deliver_pending(&inner).await;
    });
}

/// Send pending messages in order until the queue empties or a send fails.
async fn deliver_pending(inner: &Arc<Inner>) {
    let _guard = inner.delivering.lock().await;

    loop {
        let message = {
            let mut state = inner.state.lock();
            if matches!(
                state.connection,
                ConnectionState::PermanentlyDisconnected | ConnectionState::Reconnecting
            ) {
                return;
            }
            match state.pending.pop_front() {
                Some(m) => m,
                None => return,
            }
        };

        if !inner.channel.is_connected() {
            inner.state.lock().pending.push_front(message);
            schedule_reconnect(inner);
            return;
        }

        match inner.channel.send(&message).await {
            Ok(()) => {
                inner.sent.fetch_add(1, Ordering::Relaxed);
                if message.kind == MessageType::Evaluation {
                    inner
                        .results_sent
                        .fetch_add(delivered_results(&message), Ordering::Relaxed);
                }
                let mut state = inner.state.lock();
                state.connection = ConnectionState::Connected;
                state.attempts = 0;
            }
            Err(e) => {
                inner.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("Send of {:?} message failed, re-queued: {}", message.kind, e);
                inner.state.lock().pending.push_front(message);
                schedule_reconnect(inner);
                return;
            }
        }
    }
}

fn delivered_results(message: &WireMessage) -> u64 {
    message
        .payload
        .get("results")
        .and_then(|r| r.as_array())
        .map(|r| r.len() as u64)
        .unwrap_or(0)
}

// ================================================================================================
// RECONNECT & HEARTBEAT
// ================================================================================================

fn schedule_reconnect(inner: &Arc<Inner>) {
    if inner.reconnect_scheduled.swap(true, Ordering::AcqRel) {
        return;
    }

    let inner = inner.clone();
    tokio::spawn(async move {
        loop {
            let attempt = {
                let mut state = inner.state.lock();
                state.attempts += 1;
                state.connection = ConnectionState::Reconnecting;
                state.attempts
            };

            if inner.config.backoff.exhausted(attempt) {
                inner.give_up();
                inner.reconnect_scheduled.store(false, Ordering::Release);
                return;
            }

            let delay = inner.config.backoff.delay_for(attempt);
            log::debug!("Reconnect attempt {} in {:?}", attempt, delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = inner.shutdown.cancelled() => {
                    inner.state.lock().connection = ConnectionState::Disconnected;
                    inner.reconnect_scheduled.store(false, Ordering::Release);
                    return;
                }
            }

            match inner.channel.connect().await {
                Ok(()) => {
                    log::info!("Transport reconnected after {} attempts", attempt);
                    inner.state.lock().connection = ConnectionState::Connected;
                    inner.reconnect_scheduled.store(false, Ordering::Release);
                    deliver_pending(&inner).await;
                    return;
                }
                Err(e) => log::warn!("Reconnect attempt {} failed: {}", attempt, e),
            }
        }
    });
}

fn spawn_heartbeat(inner: &Arc<Inner>) {
    let inner = inner.clone();
    tokio::spawn(async move {
        let period = inner.config.heartbeat_interval;
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = inner.shutdown.cancelled() => return,
            }

            let health = inner.health();
            if health.status == HealthStatus::Unhealthy {
                log::debug!("Skipping heartbeat while disconnected");
                continue;
            }

            let payload = match serde_json::to_value(&health) {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("Failed to encode heartbeat: {}", e);
                    continue;
                }
            };
            // Heartbeats are not queued; a stale one carries no information
            let message = WireMessage::new(MessageType::Heartbeat, payload);
            if let Err(e) = inner.channel.send(&message).await {
                inner.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("Heartbeat failed: {}", e);
                schedule_reconnect(&inner);
            } else {
                inner.sent.fetch_add(1, Ordering::Relaxed);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Channel that fails the first `failures` sends.
    struct FlakyChannel {
        failures: Mutex<u32>,
        delivered: Mutex<Vec<WireMessage>>,
    }

    impl FlakyChannel {
        fn new(failures: u32) -> Self {
            Self {
                failures: Mutex::new(failures),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Channel for FlakyChannel {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn send(&self, message: &WireMessage) -> Result<()> {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(SweepError::Transport("flaky".to_string()));
            }
            self.delivered.lock().push(message.clone());
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn result(n: usize) -> EvaluationResult {
        use crate::types::{Category, ComplianceLevel, ElementHandle, ElementRef, Rect, Severity};
        EvaluationResult {
            id: format!("image-alt@img#i{}", n),
            rule_id: "image-alt".to_string(),
            result_type: "media-violation".to_string(),
            category: Category::Media,
            severity: Severity::Error,
            level: ComplianceLevel::A,
            criteria: vec!["1.1.1".to_string()],
            selector: format!("img#i{}", n),
            element: Arc::new(ElementRef {
                handle: ElementHandle(n as u64),
                selector: format!("img#i{}", n),
                tag: "img".to_string(),
                attributes: Default::default(),
                text: String::new(),
                rect: Rect::default(),
            }),
            message: "Image has no alt text".to_string(),
            metadata: Default::default(),
            timestamp: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_buffer_cuts_batch_immediately() {
        let channel = Arc::new(FlakyChannel::new(0));
        let transport = StreamingTransport::new(TransportConfig::default(), channel.clone());

        transport.push((0..120).map(result).collect());
        assert_eq!(transport.buffered_len(), 20);
        assert_eq!(transport.sequence(), 2);

        transport.flush().await.unwrap();
        let delivered = channel.delivered.lock();
        assert_eq!(delivered.len(), 3);
        assert!(delivered.iter().all(|m| m.kind == MessageType::Evaluation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_batch_flushes_after_interval() {
        let channel = Arc::new(FlakyChannel::new(0));
        let transport = StreamingTransport::new(TransportConfig::default(), channel.clone());

        transport.push(vec![result(1)]);
        assert!(channel.delivered.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(channel.delivered.lock().len(), 1);
        assert_eq!(transport.buffered_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_batch_is_compressed() {
        let channel = Arc::new(FlakyChannel::new(0));
        let config = TransportConfig {
            compression_threshold: 512,
            ..TransportConfig::default()
        };
        let transport = StreamingTransport::new(config, channel.clone());

        transport.push((0..10).map(result).collect());
        transport.flush().await.unwrap();

        let delivered = channel.delivered.lock();
        let message = &delivered[0];
        assert!(message.is_compressed());
        let raw = compress::gunzip_base64(message.payload.as_str().unwrap()).unwrap();
        let payload: EvaluationPayload = serde_json::from_slice(&raw).unwrap();
        assert_eq!(payload.results.len(), 10);
        assert_eq!(payload.summary.new_results, 10);
        assert_eq!(transport.stats().compressed_batches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seen_results_counted_on_resend() {
        let channel = Arc::new(FlakyChannel::new(0));
        let transport = StreamingTransport::new(TransportConfig::default(), channel.clone());

        transport.push(vec![result(1), result(2)]);
        transport.flush().await.unwrap();
        transport.push(vec![result(2), result(3)]);
        transport.flush().await.unwrap();

        let delivered = channel.delivered.lock();
        let second: EvaluationPayload =
            serde_json::from_value(delivered[1].payload.clone()).unwrap();
        assert_eq!(second.sequence, 2);
        assert_eq!(second.summary.new_results, 1);
        assert_eq!(second.summary.seen_results, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_fires_error_callback() {
        let channel = Arc::new(FlakyChannel::new(u32::MAX));
        let config = TransportConfig {
            backoff: BackoffConfig {
                max_attempts: 2,
                ..BackoffConfig::default()
            },
            ..TransportConfig::default()
        };
        let transport = StreamingTransport::new(config, channel.clone());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        transport.on_error(Arc::new(move |e: &SweepError| {
            sink.lock().push(e.to_string());
        }));

        transport.push(vec![result(1)]);
        let _ = transport.flush().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(transport.state(), ConnectionState::PermanentlyDisconnected);
        assert_eq!(errors.lock().len(), 1);
        assert_eq!(transport.pending_len(), 1);
        assert!(matches!(
            transport.flush().await,
            Err(SweepError::TransportExhausted { .. })
        ));
        assert_eq!(transport.health().status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_health_degrades_with_backlog() {
        let channel = Arc::new(FlakyChannel::new(0));
        let config = TransportConfig {
            degraded_backlog: 1,
            ..TransportConfig::default()
        };
        let transport = StreamingTransport::new(config, channel);
        assert_eq!(transport.health().status, HealthStatus::Unhealthy);

        {
            let mut state = transport.inner.state.lock();
            state.connection = ConnectionState::Connected;
            for _ in 0..3 {
                state
                    .pending
                    .push_back(WireMessage::new(MessageType::Progress, serde_json::json!({})));
            }
        }
        assert_eq!(transport.health().status, HealthStatus::Degraded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pushes_queue_in_sequence_order() {
        let channel = Arc::new(FlakyChannel::new(0));
        let transport = StreamingTransport::new(TransportConfig::default(), channel.clone());

        let tasks: Vec<_> = (0..8)
            .map(|t| {
                let transport = transport.clone();
                tokio::spawn(async move {
                    transport.push((t * 50..(t + 1) * 50).map(result).collect());
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        transport.flush().await.unwrap();

        let sequences: Vec<u64> = channel
            .delivered
            .lock()
            .iter()
            .map(|m| m.payload["sequence"].as_u64().unwrap())
            .collect();
        assert_eq!(sequences, (1..=8).collect::<Vec<u64>>());
    }

    fn heartbeats(channel: &FlakyChannel) -> usize {
        channel
            .delivered
            .lock()
            .iter()
            .filter(|m| m.kind == MessageType::Heartbeat)
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_sent_each_interval() {
        let channel = Arc::new(FlakyChannel::new(0));
        let transport = StreamingTransport::new(TransportConfig::default(), channel.clone());
        transport.start().await;

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(heartbeats(&channel), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(heartbeats(&channel), 1);

        let delivered = channel.delivered.lock();
        let beat: HealthPayload = serde_json::from_value(delivered[0].payload.clone()).unwrap();
        assert_eq!(beat.status, HealthStatus::Healthy);
        drop(delivered);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(heartbeats(&channel), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_heartbeat_while_disconnected() {
        let channel = Arc::new(FlakyChannel::new(0));
        let transport = StreamingTransport::new(TransportConfig::default(), channel.clone());
        transport.start().await;

        transport.inner.state.lock().connection = ConnectionState::Reconnecting;
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(heartbeats(&channel), 0);

        transport.inner.state.lock().connection = ConnectionState::PermanentlyDisconnected;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(heartbeats(&channel), 0);

        transport.inner.state.lock().connection = ConnectionState::Connected;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(heartbeats(&channel), 1);
    }
}

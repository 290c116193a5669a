//! Delivery guarantees of the streaming transport under a flaky channel.
//!
//! Tests verify:
//! - A batch survives consecutive send failures and is delivered once
//! - Reconnect delays follow the exponential backoff schedule
//! - Pending order is preserved across failures

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use sweep::transport::{
    Channel, ConnectionState, EvaluationPayload, MessageType, StreamingTransport,
    TransportConfig, WireMessage,
};
use sweep::types::{
    Category, ComplianceLevel, ElementHandle, ElementRef, EvaluationResult, Rect, Severity,
};
use sweep::{Result, SweepError};
use tokio::time::Instant;

/// Channel that fails the first `failures` sends and records every attempt.
struct FlakyChannel {
    failures: Mutex<u32>,
    attempts: Mutex<Vec<Instant>>,
    delivered: Mutex<Vec<WireMessage>>,
}

impl FlakyChannel {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(failures),
            attempts: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Channel for FlakyChannel {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, message: &WireMessage) -> Result<()> {
        self.attempts.lock().push(Instant::now());
        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(SweepError::Transport("connection reset".to_string()));
        }
        self.delivered.lock().push(message.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

fn result(n: u64) -> EvaluationResult {
    let selector = format!("p#t{}", n);
    EvaluationResult {
        id: format!("color-contrast@{}", selector),
        rule_id: "color-contrast".to_string(),
        result_type: "contrast-violation".to_string(),
        category: Category::Contrast,
        severity: Severity::Error,
        level: ComplianceLevel::AA,
        criteria: vec!["1.4.3".to_string()],
        selector: selector.clone(),
        element: Arc::new(ElementRef {
            handle: ElementHandle(n),
            selector,
            tag: "p".to_string(),
            attributes: BTreeMap::new(),
            text: "text".to_string(),
            rect: Rect::default(),
        }),
        message: "Contrast 2.8:1 is below 4.5:1".to_string(),
        metadata: BTreeMap::new(),
        timestamp: 1,
    }
}

async fn wait_for_delivery(channel: &FlakyChannel, count: usize) {
    while channel.delivered.lock().len() < count {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_three_failures_then_success_delivers_once() {
    let channel = FlakyChannel::new(3);
    let transport = StreamingTransport::new(TransportConfig::default(), channel.clone());

    let batch: Vec<EvaluationResult> = (0..5).map(result).collect();
    transport.push(batch.clone());
    transport.flush().await.unwrap();

    wait_for_delivery(&channel, 1).await;
    // Give any duplicate a chance to show up
    tokio::time::sleep(Duration::from_secs(60)).await;

    let delivered = channel.delivered.lock();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].kind, MessageType::Evaluation);

    let payload: EvaluationPayload = serde_json::from_value(delivered[0].payload.clone()).unwrap();
    assert_eq!(payload.sequence, 1);
    assert_eq!(payload.results, batch);
    assert_eq!(transport.pending_len(), 0);
    assert_eq!(transport.state(), ConnectionState::Connected);
    assert_eq!(transport.stats().messages_failed, 3);
    assert_eq!(transport.health().reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_double() {
    let channel = FlakyChannel::new(3);
    let transport = StreamingTransport::new(TransportConfig::default(), channel.clone());

    transport.push(vec![result(1)]);
    transport.flush().await.unwrap();
    wait_for_delivery(&channel, 1).await;

    let attempts = channel.attempts.lock();
    assert_eq!(attempts.len(), 4);
    let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_order_preserved_across_failures() {
    let channel = FlakyChannel::new(2);
    let config = TransportConfig {
        batch_size: 2,
        ..TransportConfig::default()
    };
    let transport = StreamingTransport::new(config, channel.clone());

    transport.push((0..6).map(result).collect());
    transport.send_error("late failure", None);
    transport.flush().await.unwrap();
    wait_for_delivery(&channel, 4).await;

    let delivered = channel.delivered.lock();
    let sequences: Vec<u64> = delivered
        .iter()
        .filter(|m| m.kind == MessageType::Evaluation)
        .map(|m| m.payload["sequence"].as_u64().unwrap())
        .collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert_eq!(delivered.last().unwrap().kind, MessageType::Error);
}

#[tokio::test(start_paused = true)]
async fn test_control_messages_follow_buffered_results() {
    let channel = FlakyChannel::new(0);
    let transport = StreamingTransport::new(TransportConfig::default(), channel.clone());

    // One result stays in the buffer below batch_size
    transport.push(vec![result(1)]);
    transport.send_progress("run-1", 1.0);
    transport.push(vec![result(2)]);
    transport.send_error("run failed", Some("run-1"));
    wait_for_delivery(&channel, 4).await;

    let kinds: Vec<MessageType> = channel.delivered.lock().iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![
            MessageType::Evaluation,
            MessageType::Progress,
            MessageType::Evaluation,
            MessageType::Error
        ]
    );
    assert_eq!(transport.buffered_len(), 0);
}

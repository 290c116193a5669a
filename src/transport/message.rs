//! Wire messages sent to the result collector.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::Result;
use crate::scheduler::EvaluationState;
use crate::types::{now_ms, EvaluationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Heartbeat,
    Evaluation,
    Progress,
    Error,
    Complete,
}

/// Envelope for everything the transport emits.
///
/// When `compressed` is true, `payload` is a base64 string of the
/// gzip-compressed JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub id: String,
    pub timestamp: u64,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed: Option<bool>,
}

impl WireMessage {
    pub fn new(kind: MessageType, payload: serde_json::Value) -> Self {
        Self {
            kind,
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now_ms(),
            payload,
            compressed: None,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed == Some(true)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Per-batch counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    /// Results whose id this transport has not emitted before
    pub new_results: usize,
    /// Results re-emitted for an id already sent
    pub seen_results: usize,
}

impl BatchSummary {
    /// Count `results`, recording their ids in `seen`.
    pub fn build(results: &[EvaluationResult], seen: &mut HashSet<String>) -> Self {
        let mut summary = BatchSummary {
            total: results.len(),
            ..BatchSummary::default()
        };

        for r in results {
            *summary
                .by_severity
                .entry(r.severity.to_string())
                .or_insert(0) += 1;
            *summary.by_type.entry(r.result_type.clone()).or_insert(0) += 1;

            if seen.insert(r.id.clone()) {
                summary.new_results += 1;
            } else {
                summary.seen_results += 1;
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchMetrics {
    /// Uncompressed JSON size of the result batch
    pub payload_bytes: usize,
    /// Batches waiting behind this one when it was built
    pub queued_batches: usize,
    pub build_us: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationPayload {
    /// Monotonic per transport instance
    pub sequence: u64,
    pub results: Vec<EvaluationResult>,
    pub summary: BatchSummary,
    pub metrics: BatchMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthPayload {
    pub status: HealthStatus,
    pub uptime_ms: u64,
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub batches_pending: usize,
    pub results_buffered: usize,
    pub reconnect_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub run_id: String,
    pub fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletePayload {
    pub run_id: String,
    pub state: EvaluationState,
    pub total_results: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

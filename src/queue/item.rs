//! Queue item lifecycle types.

use serde::Serialize;
use std::sync::Arc;

use crate::engine::EvaluateOptions;
use crate::scheduler::EvaluationReport;
use crate::types::ElementHandle;

/// Monotonic: `Pending → Processing → Complete | Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Complete,
    Error,
}

impl ItemStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, ItemStatus::Complete | ItemStatus::Error)
    }
}

/// One caller-submitted evaluation request.
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: String,
    pub priority: i32,
    /// Enqueue order, breaks priority ties
    pub seq: u64,
    pub status: ItemStatus,
    #[serde(skip)]
    pub elements: Arc<Vec<ElementHandle>>,
    #[serde(skip)]
    pub options: Arc<EvaluateOptions>,
    /// Fraction of sampled elements evaluated so far
    pub progress: f64,
    /// Order in which items left `Pending`
    pub start_order: Option<u64>,
    pub enqueued_at: u64,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
    #[serde(skip)]
    pub report: Option<Arc<EvaluationReport>>,
    pub error: Option<String>,
}

impl QueueItem {
    pub(crate) fn new(
        id: String,
        seq: u64,
        elements: Vec<ElementHandle>,
        options: EvaluateOptions,
        priority: i32,
        enqueued_at: u64,
    ) -> Self {
        Self {
            id,
            priority,
            seq,
            status: ItemStatus::Pending,
            elements: Arc::new(elements),
            options: Arc::new(options),
            progress: 0.0,
            start_order: None,
            enqueued_at,
            started_at: None,
            finished_at: None,
            report: None,
            error: None,
        }
    }

    pub fn result_count(&self) -> usize {
        self.report.as_ref().map_or(0, |r| r.results.len())
    }
}

/// Queue counters. `peak_processing` is the highest concurrent count seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub complete: usize,
    pub error: usize,
    pub peak_processing: usize,
}

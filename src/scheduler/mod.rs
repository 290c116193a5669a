//! # Evaluation Scheduler
//!
//! Turns one evaluation request into a cancellable sequence of bounded
//! chunks.
//!
//! ## State machine
//!
//! `Created → Sampling → Processing (per chunk) → Completed | Aborted | MemoryLimited`
//!
//! Each chunk, in order:
//! 1. Check the run's cancellation token (and the advisory timeout)
//! 2. Evaluate the chunk through the rule engine
//! 3. Append its results
//! 4. Stop early if the memory probe reports usage over the ceiling
//! 5. Yield to the runtime before the next chunk
//!
//! Cancellation and memory limits are soft stops: results gathered so far
//! are returned, never discarded.
//!
//! ## Active evaluations
//!
//! Every running evaluation registers its token with the scheduler instance
//! so [`EvaluationScheduler::cancel_all`] can abort all of them. The token is
//! deregistered when the run ends, however it ends.

pub mod memory;

pub use memory::{FixedMemoryProbe, MemoryProbe, ProcessMemoryProbe};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::color::ColorCache;
use crate::engine::{EvaluateOptions, EvaluationContext, RuleEngine};
use crate::error::Result;
use crate::page::{ElementRefArena, PageModel};
use crate::sampler::{Sampler, SamplerConfig};
use crate::types::{ElementHandle, EvaluationResult};

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Sampled elements per chunk
    pub chunk_size: usize,
    /// Stop early once process memory exceeds this many bytes
    pub memory_ceiling: Option<u64>,
    pub sampler: SamplerConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            memory_ceiling: None,
            sampler: SamplerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationState {
    Created,
    Sampling,
    Processing,
    Completed,
    Aborted,
    MemoryLimited,
}

impl EvaluationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EvaluationState::Completed | EvaluationState::Aborted | EvaluationState::MemoryLimited
        )
    }
}

/// Outcome of one evaluation run.
///
/// `evaluated < sampled` tells a caller the run stopped early.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub run_id: String,
    pub state: EvaluationState,
    pub results: Vec<EvaluationResult>,
    /// Elements the caller asked for
    pub requested: usize,
    /// Elements the sampler selected
    pub sampled: usize,
    /// Sampled elements fully evaluated
    pub evaluated: usize,
    pub chunks_processed: usize,
    pub duration_ms: u64,
}

impl EvaluationReport {
    pub fn is_complete(&self) -> bool {
        self.state == EvaluationState::Completed
    }

    pub fn violations(&self) -> impl Iterator<Item = &EvaluationResult> {
        self.results.iter().filter(|r| r.is_violation())
    }
}

/// Progress after each processed chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkProgress {
    pub chunk_index: usize,
    pub chunks_total: usize,
    pub evaluated: usize,
    pub sampled: usize,
}

impl ChunkProgress {
    /// Completed share in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.sampled == 0 {
            1.0
        } else {
            self.evaluated as f64 / self.sampled as f64
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(ChunkProgress) + Send + Sync>;

type ActiveRuns = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Removes a run's token from the active set when dropped.
struct ActiveGuard {
    active: ActiveRuns,
    run_id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.run_id);
    }
}

pub struct EvaluationScheduler {
    config: SchedulerConfig,
    engine: Arc<RuleEngine>,
    page: Arc<dyn PageModel>,
    colors: Arc<ColorCache>,
    arena: Arc<ElementRefArena>,
    memory: Arc<dyn MemoryProbe>,
    active: ActiveRuns,
}

impl EvaluationScheduler {
    pub fn new(
        config: SchedulerConfig,
        engine: Arc<RuleEngine>,
        page: Arc<dyn PageModel>,
        colors: Arc<ColorCache>,
        arena: Arc<ElementRefArena>,
        memory: Arc<dyn MemoryProbe>,
    ) -> Self {
        Self {
            config,
            engine,
            page,
            colors,
            arena,
            memory,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    pub fn page(&self) -> &Arc<dyn PageModel> {
        &self.page
    }

    /// Evaluate `elements` with a fresh cancellation token.
    pub async fn evaluate(
        &self,
        elements: &[ElementHandle],
        options: EvaluateOptions,
    ) -> Result<EvaluationReport> {
        self.evaluate_with(elements, options, CancellationToken::new(), None)
            .await
    }

    /// Evaluate every element matching `selector`.
    pub async fn evaluate_selector(
        &self,
        selector: &str,
        options: EvaluateOptions,
    ) -> Result<EvaluationReport> {
        let elements = self.page.query_all(selector);
        self.evaluate(&elements, options).await
    }

    /// Evaluate `elements` under a caller-owned token.
    ///
    /// Only option validation fails; cancellation, timeout and memory
    /// pressure all return a report with partial results.
    ///
    /// # Arguments
    /// - `elements`: candidate handles, in document order
    /// - `options`: rule filter, sampling and chunking options
    /// - `cancel`: cancelling it stops the run at the next element or rule
    /// - `progress`: called after every processed chunk
    pub async fn evaluate_with(
        &self,
        elements: &[ElementHandle],
        options: EvaluateOptions,
        cancel: CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<EvaluationReport> {
        self.engine.check_options(&options)?;

        let started = Instant::now();
        let timeout = options.timeout();
        let chunk_size = options.chunk_size.unwrap_or(self.config.chunk_size).max(1);

        let ctx = EvaluationContext::new(
            self.page.clone(),
            self.colors.clone(),
            self.arena.clone(),
            options,
            cancel,
        );
        let run_id = ctx.run_id.clone();

        self.active
            .lock()
            .insert(run_id.clone(), ctx.cancel.clone());
        let _guard = ActiveGuard {
            active: self.active.clone(),
            run_id: run_id.clone(),
        };

        let mut state = EvaluationState::Created;
        log::info!(
            "[{}] evaluation {:?}: {} elements, chunk size {}",
            run_id,
            state,
            elements.len(),
            chunk_size
        );

        state = EvaluationState::Sampling;
        log::debug!("[{}] {:?}", run_id, state);
        let candidates: Vec<_> = elements
            .iter()
            .filter_map(|h| self.arena.get_or_create(self.page.as_ref(), *h))
            .collect();

        let sampler = Sampler::new(SamplerConfig {
            seed: ctx.options.seed.or(self.config.sampler.seed),
            ..self.config.sampler.clone()
        });
        let sampled = sampler.sample(
            &candidates,
            ctx.options.strategy,
            ctx.options.sample_limit,
            &ctx.viewport,
        );

        state = EvaluationState::Processing;
        log::debug!("[{}] {:?} {} sampled elements", run_id, state, sampled.len());
        let chunks_total = sampled.len().div_ceil(chunk_size);
        let mut results = Vec::new();
        let mut evaluated = 0;
        let mut chunks_processed = 0;

        for (index, chunk) in sampled.chunks(chunk_size).enumerate() {
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    log::warn!("[{}] timed out after {:?}", run_id, limit);
                    ctx.cancel.cancel();
                }
            }
            if ctx.is_cancelled() {
                state = EvaluationState::Aborted;
                break;
            }

            results.extend(self.engine.evaluate(chunk, &ctx));

            if ctx.is_cancelled() {
                // Partial chunk: keep its results, do not count it as done
                state = EvaluationState::Aborted;
                break;
            }

            evaluated += chunk.len();
            chunks_processed += 1;
            log::debug!(
                "[{}] chunk {}/{} done, {} results so far",
                run_id,
                index + 1,
                chunks_total,
                results.len()
            );

            if let Some(cb) = &progress {
                cb(ChunkProgress {
                    chunk_index: index,
                    chunks_total,
                    evaluated,
                    sampled: sampled.len(),
                });
            }

            if self.memory.exceeds(self.config.memory_ceiling) {
                log::warn!(
                    "[{}] memory ceiling exceeded, stopping after {} chunks",
                    run_id,
                    chunks_processed
                );
                state = EvaluationState::MemoryLimited;
                break;
            }

            tokio::task::yield_now().await;
        }

        if state == EvaluationState::Processing {
            state = EvaluationState::Completed;
        }

        let report = EvaluationReport {
            run_id,
            state,
            results,
            requested: elements.len(),
            sampled: sampled.len(),
            evaluated,
            chunks_processed,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        log::info!(
            "[{}] evaluation {:?}: {}/{} evaluated, {} results in {}ms",
            report.run_id,
            report.state,
            report.evaluated,
            report.sampled,
            report.results.len(),
            report.duration_ms
        );

        Ok(report)
    }

    /// Cancel every active evaluation. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let active = self.active.lock();
        for token in active.values() {
            token.cancel();
        }
        if !active.is_empty() {
            log::info!("Cancelled {} active evaluations", active.len());
        }
        active.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn active_runs(&self) -> Vec<String> {
        self.active.lock().keys().cloned().collect()
    }
}

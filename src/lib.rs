//! # Page Sweep
//!
//! Incremental, budgeted evaluation of a visual element tree against
//! pluggable accessibility rules.
//!
//! ## Pipeline
//!
//! caller → [`queue::QueueManager`] → [`scheduler::EvaluationScheduler`] →
//! [`sampler::Sampler`] → [`engine::RuleEngine`] → [`color::ColorCache`] →
//! [`transport::StreamingTransport`]
//!
//! The host page is reached only through [`page::PageModel`];
//! [`page::StaticPage`] is an in-memory implementation for headless use.
//! [`auditor::Auditor`] owns and wires every subsystem for one session.
//!
//! The library never installs a logger; it logs through the `log` facade.

pub mod auditor;
pub mod color;
pub mod config;
pub mod engine;
pub mod error;
pub mod page;
pub mod queue;
pub mod sampler;
pub mod scheduler;
pub mod transport;
pub mod types;
pub mod watch;

pub use auditor::{Auditor, AuditorStats};
pub use color::{Color, ColorCache, ContrastLevel};
pub use config::SweepConfig;
pub use engine::{EvaluateOptions, EvaluationContext, Plugin, Rule, RuleEngine, RuleOutcome};
pub use error::{Result, SweepError};
pub use page::{ElementRefArena, ElementSpec, MutationEvent, PageModel, StaticPage};
pub use queue::{ItemStatus, QueueConfig, QueueItem, QueueManager, QueueStats};
pub use sampler::{Sampler, SamplingStrategy};
pub use scheduler::{EvaluationReport, EvaluationScheduler, EvaluationState, SchedulerConfig};
pub use transport::{StreamingTransport, TransportConfig, WireMessage};
pub use types::{
    Category, ComplianceLevel, ElementHandle, ElementRef, EvaluationResult, Rect, Severity,
    Viewport,
};
pub use watch::{ChangeTracker, WatchConfig};

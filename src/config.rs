//! Aggregate configuration.
//!
//! Each subsystem owns its `*Config` with defaults; [`SweepConfig`] bundles
//! them for loading from JSON and the environment. Missing fields fall back
//! to defaults and durations are written in milliseconds.
//!
//! Environment overrides:
//! - `SWEEP_COLLECTOR_URL`: transport collector endpoint
//! - `SWEEP_CHUNK_SIZE`: scheduler chunk size
//! - `SWEEP_MAX_CONCURRENT`: queue concurrency ceiling
//! - `SWEEP_MEMORY_CEILING`: memory ceiling in bytes

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::color::CacheConfig;
use crate::error::{Result, SweepError};
use crate::page::ArenaConfig;
use crate::queue::QueueConfig;
use crate::scheduler::SchedulerConfig;
use crate::transport::TransportConfig;
use crate::watch::WatchConfig;

/// Serde adapter writing a `Duration` as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub cache: CacheConfig,
    pub arena: ArenaConfig,
    pub scheduler: SchedulerConfig,
    pub queue: QueueConfig,
    pub transport: TransportConfig,
    pub watch: WatchConfig,
    /// Emit results through the transport; needs `transport.collector_url`
    /// unless the host supplies its own channel
    pub streaming: bool,
}

impl SweepConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SweepConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON file, then apply environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SweepError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config: SweepConfig = serde_json::from_str(&text)?;
        config.apply_env()?;
        config.validate()?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = SweepConfig::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SWEEP_COLLECTOR_URL") {
            self.transport.collector_url = Some(url);
            self.streaming = true;
        }
        if let Some(v) = lookup("SWEEP_CHUNK_SIZE") {
            self.scheduler.chunk_size = parse_var("SWEEP_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("SWEEP_MAX_CONCURRENT") {
            self.queue.max_concurrent = parse_var("SWEEP_MAX_CONCURRENT", &v)?;
        }
        if let Some(v) = lookup("SWEEP_MEMORY_CEILING") {
            self.scheduler.memory_ceiling = Some(parse_var("SWEEP_MEMORY_CEILING", &v)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.chunk_size == 0 {
            return Err(SweepError::Config("scheduler.chunk_size must be > 0".to_string()));
        }
        if self.queue.max_concurrent == 0 {
            return Err(SweepError::Config("queue.max_concurrent must be > 0".to_string()));
        }
        if self.transport.batch_size == 0 {
            return Err(SweepError::Config("transport.batch_size must be > 0".to_string()));
        }
        if self.transport.backoff.multiplier < 1.0 {
            return Err(SweepError::Config(
                "transport.backoff.multiplier must be >= 1".to_string(),
            ));
        }
        if self.streaming && self.transport.collector_url.is_none() {
            log::warn!("Streaming enabled without a collector_url");
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SweepError::Config(format!("{} has invalid value '{}'", key, value)))
}

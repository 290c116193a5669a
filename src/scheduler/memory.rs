//! Memory-pressure probes consulted between chunks.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use sysinfo::{Pid, ProcessExt, System, SystemExt};

/// Reports current memory usage of the host process.
pub trait MemoryProbe: Send + Sync {
    /// Resident bytes, or `None` when the host cannot tell.
    fn used_bytes(&self) -> Option<u64>;

    /// True when usage is known and above `ceiling`.
    fn exceeds(&self, ceiling: Option<u64>) -> bool {
        match (ceiling, self.used_bytes()) {
            (Some(limit), Some(used)) => used > limit,
            _ => false,
        }
    }
}

/// Resident set size of the current process via `sysinfo`.
pub struct ProcessMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                log::warn!("Memory probe disabled, no current pid: {}", e);
                None
            }
        };

        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn used_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|p| p.memory())
    }
}

/// Probe that reports a settable value; for hosts that track memory
/// themselves and for tests.
#[derive(Debug, Default)]
pub struct FixedMemoryProbe {
    used: AtomicU64,
}

impl FixedMemoryProbe {
    pub fn new(used: u64) -> Self {
        Self {
            used: AtomicU64::new(used),
        }
    }

    pub fn set(&self, used: u64) {
        self.used.store(used, Ordering::Relaxed);
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn used_bytes(&self) -> Option<u64> {
        Some(self.used.load(Ordering::Relaxed))
    }
}

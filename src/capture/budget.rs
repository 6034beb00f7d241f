//! Whether the host has enough memory to parse a heap dump of a given size.

use sysinfo::System;

/// Memory the profiler needs to stay responsive while a dump is parsed.
pub const HPROF_LEEWAY_BYTES: u64 = 300 * 1024 * 1024;

/// Default multiple of the dump size needed to parse it.
pub const DEFAULT_HPROF_SAFE_FACTOR: u64 = 10;

/// Host memory figures in bytes.
///
/// Requestable memory is `max - total + free`: the headroom the process may
/// still claim plus what it holds but does not use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryFigures {
    pub max_memory: u64,
    pub total_memory: u64,
    pub free_memory: u64,
}

impl MemoryFigures {
    /// Figures for this machine: everything available is requestable.
    pub fn current() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        let total = sys.total_memory();
        let available = sys.available_memory().min(total);
        Self {
            max_memory: total,
            total_memory: total - available,
            free_memory: 0,
        }
    }

    pub fn requestable(&self) -> u64 {
        self.max_memory
            .saturating_sub(self.total_memory)
            .saturating_add(self.free_memory)
    }
}

/// Clamps a configured safe factor to `[1, 1000]`.
pub fn clamp_safe_factor(factor: u64) -> u64 {
    factor.clamp(1, 1000)
}

/// `true` when `safe_factor * file_size + leeway` fits in requestable memory.
pub fn can_safely_load_hprof(
    file_size: u64,
    figures: &MemoryFigures,
    safe_factor: u64,
    leeway: u64,
) -> bool {
    let needed = clamp_safe_factor(safe_factor)
        .saturating_mul(file_size)
        .saturating_add(leeway);
    figures.requestable() >= needed
}

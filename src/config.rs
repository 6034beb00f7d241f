//! Profiler settings, read from an optional JSON file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capture::budget::{clamp_safe_factor, DEFAULT_HPROF_SAFE_FACTOR, HPROF_LEEWAY_BYTES};
use crate::capture::heap_dump::HprofLoadPolicy;
use crate::stage::LiveAllocationSamplingMode;

/// Overrides `hprof_safe_factor` when set to an integer.
pub const SAFE_FACTOR_ENV: &str = "MEMSCOPE_HPROF_SAFE_FACTOR";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    pub hprof_safe_factor: u64,
    pub hprof_leeway_bytes: u64,
    pub heap_dump_poll_interval_ms: u64,
    pub native_sampling_rate_bytes: i64,
    pub live_allocation_sampling: LiveAllocationSamplingMode,
    /// Worker threads for agent round trips.
    pub dispatch_threads: usize,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            hprof_safe_factor: DEFAULT_HPROF_SAFE_FACTOR,
            hprof_leeway_bytes: HPROF_LEEWAY_BYTES,
            heap_dump_poll_interval_ms: 50,
            native_sampling_rate_bytes: 2048,
            live_allocation_sampling: LiveAllocationSamplingMode::Sampled,
            dispatch_threads: 2,
        }
    }
}

impl ProfilerConfig {
    /// Reads `path` if given, then applies the environment override.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                serde_json::from_str::<ProfilerConfig>(&text)
                    .with_context(|| format!("failed to parse config {}", path.display()))?
            }
            None => ProfilerConfig::default(),
        };
        config.hprof_safe_factor = clamp_safe_factor(config.hprof_safe_factor);
        config.apply_safe_factor_override(std::env::var(SAFE_FACTOR_ENV).ok().as_deref());
        Ok(config)
    }

    /// Applies a raw override value; anything that is not an integer is
    /// ignored with a warning.
    pub fn apply_safe_factor_override(&mut self, raw: Option<&str>) {
        let Some(raw) = raw else {
            return;
        };
        match raw.trim().parse::<u64>() {
            Ok(factor) => {
                self.hprof_safe_factor = clamp_safe_factor(factor);
                debug!("hprof safe factor set to {}", self.hprof_safe_factor);
            }
            Err(_) => warn!("Ignoring invalid {} value '{}'", SAFE_FACTOR_ENV, raw),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.heap_dump_poll_interval_ms)
    }

    pub fn hprof_policy(&self) -> HprofLoadPolicy {
        HprofLoadPolicy {
            safe_factor: self.hprof_safe_factor,
            leeway_bytes: self.hprof_leeway_bytes,
            poll_interval: self.poll_interval(),
            figures: None,
        }
    }
}

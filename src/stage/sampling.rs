use serde::{Deserialize, Serialize};

/// How densely live allocation tracking records Java allocations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveAllocationSamplingMode {
    /// Tracking off.
    None,
    /// One in every ten allocations.
    #[default]
    Sampled,
    /// Every allocation.
    Full,
}

impl LiveAllocationSamplingMode {
    pub fn sampling_interval(&self) -> i32 {
        match self {
            LiveAllocationSamplingMode::None => 0,
            LiveAllocationSamplingMode::Sampled => 10,
            LiveAllocationSamplingMode::Full => 1,
        }
    }

    /// Any interval other than 0 or 1 counts as sampled.
    pub fn from_interval(interval: i32) -> Self {
        match interval {
            0 => LiveAllocationSamplingMode::None,
            1 => LiveAllocationSamplingMode::Full,
            _ => LiveAllocationSamplingMode::Sampled,
        }
    }
}

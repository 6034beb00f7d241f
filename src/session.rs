//! Identity of the profiled target, supplied by the host.

use serde::{Deserialize, Serialize};

use crate::units::OPEN_END;

/// Android API level for Oreo, the first release with live allocation tracking.
pub const FEATURE_LEVEL_O: i32 = 26;

/// Android API level for Q, the first release with native heap sampling.
pub const FEATURE_LEVEL_Q: i32 = 29;

/// One profiled process on one device stream over a span of time.
///
/// `end_ns` is [`OPEN_END`] while the session is alive.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Session {
    pub session_id: i64,
    pub stream_id: i64,
    pub pid: i32,
    pub start_ns: i64,
    #[serde(default = "open_end")]
    pub end_ns: i64,
}

fn open_end() -> i64 {
    OPEN_END
}

impl Session {
    pub fn new(session_id: i64, stream_id: i64, pid: i32, start_ns: i64) -> Self {
        Self {
            session_id,
            stream_id,
            pid,
            start_ns,
            end_ns: OPEN_END,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.end_ns == OPEN_END
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: i64,
    pub feature_level: i32,
    pub cpu_abi: String,
}

impl Device {
    /// x86 and x86_64 devices cannot record native allocations.
    pub fn is_x86(&self) -> bool {
        self.cpu_abi.starts_with("x86")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    pub pid: i32,
    pub name: String,
}

/// How deeply the agent can inspect the process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportLevel {
    #[default]
    Debuggable,
    Profileable,
}

/// Recording features that a support level may or may not allow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Feature {
    HeapDump,
    NativeRecording,
    JvmRecording,
}

impl Feature {
    pub fn title(&self) -> &'static str {
        match self {
            Feature::HeapDump => "Heap dump",
            Feature::NativeRecording => "Native allocations recording",
            Feature::JvmRecording => "Java / Kotlin allocations recording",
        }
    }
}

impl SupportLevel {
    pub fn is_feature_supported(&self, feature: Feature) -> bool {
        match self {
            SupportLevel::Debuggable => true,
            // Profileable processes only expose native sampling.
            SupportLevel::Profileable => matches!(feature, Feature::NativeRecording),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_alive() {
        let mut session = Session::new(1, 2, 3, 100);
        assert!(session.is_alive());
        session.end_ns = 200;
        assert!(!session.is_alive());
    }

    #[test]
    fn test_profileable_support() {
        assert!(SupportLevel::Debuggable.is_feature_supported(Feature::HeapDump));
        assert!(!SupportLevel::Profileable.is_feature_supported(Feature::HeapDump));
        assert!(SupportLevel::Profileable.is_feature_supported(Feature::NativeRecording));
    }
}

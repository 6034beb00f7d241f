//! Common test utilities for memscope integration tests.
//!
//! Builds a [`Profilers`] over an [`InMemoryTransport`] so tests can drive the
//! stages the way a host would and inspect what reached the agent.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use memscope::capture::CaptureKind;
use memscope::config::ProfilerConfig;
use memscope::profilers::{FeatureTracker, Profilers};
use memscope::session::{Device, Process, Session, SupportLevel};
use memscope::transport::{CommandKind, InMemoryTransport};

pub const PID: i32 = 42;
pub const STREAM_ID: i64 = 7;

/// Counts usage reports instead of sending them anywhere.
#[derive(Default)]
pub struct CountingFeatureTracker {
    pub dump_heap: AtomicUsize,
    pub record_allocations: AtomicUsize,
    pub selected: Mutex<Vec<CaptureKind>>,
}

impl FeatureTracker for CountingFeatureTracker {
    fn track_dump_heap(&self) {
        self.dump_heap.fetch_add(1, Ordering::SeqCst);
    }

    fn track_record_allocations(&self) {
        self.record_allocations.fetch_add(1, Ordering::SeqCst);
    }

    fn track_select_capture(&self, kind: CaptureKind) {
        self.selected.lock().unwrap().push(kind);
    }
}

/// Configuration for a test environment
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub feature_level: i32,
    pub cpu_abi: String,
    pub support_level: SupportLevel,
    pub first_command_id: Option<i64>,
    pub agent_time_ns: i64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            feature_level: 30,
            cpu_abi: "arm64-v8a".to_string(),
            support_level: SupportLevel::Debuggable,
            first_command_id: None,
            agent_time_ns: 1_000_000_000,
        }
    }
}

pub struct TestEnv {
    pub agent: Arc<InMemoryTransport>,
    pub tracker: Arc<CountingFeatureTracker>,
    pub profilers: Profilers,
}

impl TestEnv {
    pub fn new(config: TestConfig) -> Self {
        Self::with_agent(config, Arc::new(InMemoryTransport::new()))
    }

    /// Wraps an agent that already holds recorded events.
    pub fn with_agent(config: TestConfig, agent: Arc<InMemoryTransport>) -> Self {
        agent.set_time_ns(config.agent_time_ns);
        let tracker = Arc::new(CountingFeatureTracker::default());
        let profiler_config = ProfilerConfig {
            heap_dump_poll_interval_ms: 1,
            hprof_leeway_bytes: 0,
            ..ProfilerConfig::default()
        };
        let mut profilers = Profilers::new(
            agent.clone(),
            Session::new(1, STREAM_ID, PID, 0),
            Device {
                device_id: 1,
                feature_level: config.feature_level,
                cpu_abi: config.cpu_abi,
            },
            Process {
                pid: PID,
                name: "com.example.app".to_string(),
            },
            profiler_config,
        )
        .with_support_level(config.support_level)
        .with_feature_tracker(tracker.clone());
        if let Some(first) = config.first_command_id {
            profilers = profilers.with_first_command_id(first);
        }
        Self {
            agent,
            tracker,
            profilers,
        }
    }

    /// Enters the main stage and lets its first refresh land.
    pub fn start(&mut self) {
        self.profilers.start();
        self.profilers.settle();
    }

    /// Advances the agent clock, then ticks until work settles.
    pub fn advance(&mut self, delta_ns: i64) {
        self.agent.advance_ns(delta_ns);
        self.profilers.settle();
    }

    /// Names of the commands the agent received, in order.
    pub fn executed(&self) -> Vec<&'static str> {
        self.agent
            .executed_commands()
            .iter()
            .map(|c| c.kind.name())
            .collect()
    }

    pub fn executed_kinds(&self) -> Vec<CommandKind> {
        self.agent
            .executed_commands()
            .into_iter()
            .map(|c| c.kind)
            .collect()
    }
}

/// A heap snapshot payload with a `zygote` and an `app` heap.
pub fn heap_snapshot() -> Vec<u8> {
    br#"{
        "heaps": [{"id": 0, "name": "zygote"}, {"id": 1, "name": "app"}],
        "classes": [
            {"id": 1, "name": "java.lang.String"},
            {"id": 2, "name": "com.example.Cache"}
        ],
        "instances": [
            {"id": 10, "class_id": 1, "heap_id": 0, "shallow_size": 24, "retained_size": 24},
            {"id": 11, "class_id": 1, "heap_id": 1, "shallow_size": 24, "retained_size": 40},
            {"id": 12, "class_id": 2, "heap_id": 1, "shallow_size": 32, "retained_size": 512}
        ]
    }"#
    .to_vec()
}

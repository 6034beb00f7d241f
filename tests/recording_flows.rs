//! Integration tests for recording flows on the main memory stage.
//!
//! Every test drives a `Profilers` over the in-memory agent: commands go out
//! through the dispatch pool, status events come back through the pending
//! command table, and `settle()` ticks until the round trips have landed.

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use common::{heap_snapshot, TestConfig, TestEnv, PID, STREAM_ID};
use memscope::capture::CaptureKind;
use memscope::profilers::HAS_USED_MEMORY_CAPTURE;
use memscope::session::SupportLevel;
use memscope::stage::options::{HEAP_DUMP_TITLE, JAVA_KOTLIN_TITLE, NATIVE_TITLE, X86_NATIVE_UNAVAILABLE};
use memscope::stage::{MemoryProfilerAspect, RecordingKind, RecordingState, StageType};
use memscope::transport::{
    AllocationsInfo, CommandKind, Event, EventData, HeapDumpStatusCode, InMemoryTransport,
    NativeSampleData, TraceStartCode, TraceStartStatus, TraceStatusData, TraceStopCode,
};
use memscope::units::{Range, INVALID_START_TIME};

fn tracker_state(env: &mut TestEnv, kind: RecordingKind) -> RecordingState {
    env.profilers
        .main_stage(|stage, _| stage.tracker(kind).state().clone())
        .expect("main stage is active")
}

fn observe(env: &mut TestEnv) -> Arc<Mutex<Vec<MemoryProfilerAspect>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    env.profilers.main_stage(|stage, _| {
        stage
            .aspects_mut()
            .add_observer(move |aspect| sink.lock().unwrap().push(aspect))
    });
    seen
}

#[test]
fn test_heap_dump_selects_latest_capture() {
    let mut env = TestEnv::new(TestConfig::default());
    env.agent
        .configure(|b| b.heap_dump_payload = Some(heap_snapshot()));
    env.start();
    let seen = observe(&mut env);

    let requested = env.profilers.main_stage(|stage, p| {
        stage.enable_select_latest_capture(true);
        stage.request_heap_dump(p)
    });
    assert_eq!(requested, Some(true));
    env.profilers.settle();

    assert_eq!(env.executed(), vec!["HEAP_DUMP"]);
    let seen = seen.lock().unwrap().clone();
    assert!(seen.contains(&MemoryProfilerAspect::HeapDumpStarted));
    assert!(seen.contains(&MemoryProfilerAspect::HeapDumpFinished));

    assert_eq!(env.profilers.stage_type(), Some(StageType::Capture));
    let labels = env
        .profilers
        .capture_stage(|stage, _| {
            let tree = stage.selection_mut().tree_mut().expect("tree is built");
            let root = tree.root();
            let mut labels = vec![tree.node(root).label()];
            for child in tree.children(root) {
                labels.push(tree.node(child).label());
            }
            labels
        })
        .expect("capture stage is active");
    assert_eq!(labels, vec!["app", "Cache", "String"]);

    let selection = env.profilers.timeline().selection();
    assert_eq!(selection.min, 1_000_000);
    assert_eq!(env.tracker.dump_heap.load(Ordering::SeqCst), 1);
    assert_eq!(
        *env.tracker.selected.lock().unwrap(),
        vec![CaptureKind::HeapDump]
    );
    assert!(env.profilers.services().get_bool(HAS_USED_MEMORY_CAPTURE, false));
}

#[test]
fn test_heap_dump_failure_sets_error() {
    let mut env = TestEnv::new(TestConfig::default());
    env.agent
        .configure(|b| b.heap_dump_status = HeapDumpStatusCode::NotProfiling);
    env.start();

    env.profilers
        .main_stage(|stage, p| stage.request_heap_dump(p));
    env.profilers.settle();

    assert!(matches!(
        tracker_state(&mut env, RecordingKind::HeapDump),
        RecordingState::Failed { .. }
    ));
    let error = env
        .profilers
        .main_stage(|stage, _| stage.options().last_error().map(str::to_string))
        .flatten()
        .expect("error is recorded");
    assert!(error.contains("Heap dump failed"));
    assert_eq!(env.profilers.stage_type(), Some(StageType::Main));
}

#[test]
fn test_in_progress_heap_dump_counts_as_started() {
    let mut env = TestEnv::new(TestConfig::default());
    env.agent
        .configure(|b| b.heap_dump_status = HeapDumpStatusCode::InProgress);
    env.start();

    env.profilers
        .main_stage(|stage, p| stage.request_heap_dump(p));
    env.profilers.settle();

    assert_eq!(
        tracker_state(&mut env, RecordingKind::HeapDump),
        RecordingState::Recording {
            start_ns: 1_000_000_000
        }
    );
    let recording = env
        .profilers
        .main_stage(|stage, _| stage.options().is_recording());
    assert_eq!(recording, Some(true));
}

#[test]
fn test_native_recording_status_is_one_shot() {
    let mut env = TestEnv::new(TestConfig {
        first_command_id: Some(7),
        ..TestConfig::default()
    });
    env.start();
    let seen = observe(&mut env);
    let tracking_changes = |seen: &Arc<Mutex<Vec<MemoryProfilerAspect>>>| {
        seen.lock()
            .unwrap()
            .iter()
            .filter(|a| **a == MemoryProfilerAspect::TrackingEnabled)
            .count()
    };

    let started = env
        .profilers
        .main_stage(|stage, p| stage.start_native_allocation_capture(p));
    assert_eq!(started, Some(true));
    env.profilers.settle();
    assert_eq!(tracking_changes(&seen), 1);

    let commands = env.agent.executed_commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].command_id, 7);
    match &commands[0].kind {
        CommandKind::StartTrace(config) => {
            assert_eq!(config.app_name, "com.example.app");
            assert_eq!(config.abi_cpu_arch, "arm64-v8a");
            assert_eq!(config.sampling_interval_bytes, 2048);
        }
        other => panic!("unexpected command {other:?}"),
    }
    assert_eq!(
        tracker_state(&mut env, RecordingKind::NativeAllocations),
        RecordingState::Recording {
            start_ns: 1_000_000_000
        }
    );

    // A second status for the same command must not move the recording.
    env.agent.add_event(
        STREAM_ID,
        Event::new(
            PID,
            1_500_000_000,
            EventData::TraceStatus(TraceStatusData {
                start: Some(TraceStartStatus {
                    status: TraceStartCode::Success,
                    start_time_ns: 1_500_000_000,
                    ..TraceStartStatus::default()
                }),
                stop: None,
            }),
        )
        .with_command(7),
    );
    env.advance(1_000_000_000);
    assert_eq!(
        tracker_state(&mut env, RecordingKind::NativeAllocations),
        RecordingState::Recording {
            start_ns: 1_000_000_000
        }
    );
    assert_eq!(tracking_changes(&seen), 1);

    let stopped = env
        .profilers
        .main_stage(|stage, p| stage.toggle_native_allocation_tracking(p));
    assert_eq!(stopped, Some(true));
    env.profilers.settle();

    assert_eq!(env.executed(), vec!["START_TRACE", "STOP_TRACE"]);
    assert_eq!(env.agent.executed_commands()[1].command_id, 8);
    assert_eq!(tracking_changes(&seen), 2);
    assert_eq!(
        tracker_state(&mut env, RecordingKind::NativeAllocations),
        RecordingState::Idle
    );
    let native_captures = env
        .profilers
        .main_stage(|stage, _| {
            stage
                .captures()
                .iter()
                .filter(|d| d.value.kind() == CaptureKind::NativeAllocationSample)
                .map(|d| d.value.is_open())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    assert_eq!(native_captures, vec![false]);
}

#[test]
fn test_native_stop_with_nothing_running_goes_idle() {
    let mut env = TestEnv::new(TestConfig::default());
    env.start();
    env.profilers
        .main_stage(|stage, p| stage.start_native_allocation_capture(p));
    env.profilers.settle();

    // The agent ended the recording on its own.
    env.agent.add_event(
        STREAM_ID,
        Event::new(
            PID,
            1_200_000_000,
            EventData::NativeSample(NativeSampleData {
                start_time_ns: 1_000_000_000,
                end_time_ns: 1_200_000_000,
            }),
        )
        .with_group(1_000_000_000)
        .ended(true),
    );
    env.profilers
        .main_stage(|stage, p| stage.stop_memory_recording(p));
    env.profilers.settle();

    assert_eq!(
        tracker_state(&mut env, RecordingKind::NativeAllocations),
        RecordingState::Idle
    );
    let error = env
        .profilers
        .main_stage(|stage, _| stage.options().last_error().map(str::to_string))
        .flatten();
    assert_eq!(error, None);
}

#[test]
fn test_native_stop_failure_keeps_recording() {
    let mut env = TestEnv::new(TestConfig::default());
    env.agent
        .configure(|b| b.trace_stop_status = TraceStopCode::Failure);
    env.start();
    env.profilers
        .main_stage(|stage, p| stage.start_native_allocation_capture(p));
    env.profilers.settle();
    env.profilers
        .main_stage(|stage, p| stage.stop_native_allocation_tracking(p));
    env.profilers.settle();

    assert_eq!(
        tracker_state(&mut env, RecordingKind::NativeAllocations),
        RecordingState::Recording {
            start_ns: 1_000_000_000
        }
    );
    let (error, recording) = env
        .profilers
        .main_stage(|stage, _| {
            (
                stage.options().last_error().map(str::to_string),
                stage.options().is_recording(),
            )
        })
        .expect("main stage is active");
    assert!(error.expect("error is recorded").contains("trace stop failed"));
    assert!(recording);

    // The recording is still known, so the session end stops it again.
    env.agent
        .configure(|b| b.trace_stop_status = TraceStopCode::Success);
    env.profilers.end_session(2_000_000_000);
    env.profilers.settle();
    assert_eq!(env.executed(), vec!["START_TRACE", "STOP_TRACE", "STOP_TRACE"]);
    assert_eq!(
        tracker_state(&mut env, RecordingKind::NativeAllocations),
        RecordingState::Idle
    );
}

#[test]
fn test_rejected_stop_does_not_restart_recording() {
    let mut env = TestEnv::new(TestConfig::default());
    env.start();
    env.profilers
        .main_stage(|stage, p| stage.start_native_allocation_capture(p));
    env.profilers.settle();

    env.agent.configure(|b| b.fail_execute = true);
    env.profilers
        .main_stage(|stage, p| stage.toggle_native_allocation_tracking(p));
    env.profilers.settle();
    assert_eq!(
        tracker_state(&mut env, RecordingKind::NativeAllocations),
        RecordingState::Recording {
            start_ns: 1_000_000_000
        }
    );
    let error = env
        .profilers
        .main_stage(|stage, _| {
            stage
                .tracker(RecordingKind::NativeAllocations)
                .last_error()
                .map(str::to_string)
        })
        .flatten()
        .expect("error is recorded");
    assert!(error.contains("STOP_TRACE rejected"));

    // Toggling again retries the stop instead of starting a second trace.
    env.agent.configure(|b| b.fail_execute = false);
    env.profilers
        .main_stage(|stage, p| stage.toggle_native_allocation_tracking(p));
    env.profilers.settle();
    assert_eq!(env.executed(), vec!["START_TRACE", "STOP_TRACE"]);
    assert_eq!(
        tracker_state(&mut env, RecordingKind::NativeAllocations),
        RecordingState::Idle
    );
}

#[test]
fn test_session_end_stops_native_recording() {
    let mut env = TestEnv::new(TestConfig::default());
    env.start();
    env.profilers
        .main_stage(|stage, p| stage.start_native_allocation_capture(p));
    env.profilers.settle();

    env.profilers.end_session(2_000_000_000);
    env.profilers.settle();

    assert_eq!(env.executed(), vec!["START_TRACE", "STOP_TRACE"]);
    assert_eq!(
        tracker_state(&mut env, RecordingKind::NativeAllocations),
        RecordingState::Idle
    );
    assert!(!env.profilers.timeline().is_streaming());
}

#[test]
fn test_transport_failure_marks_request_failed() {
    let mut env = TestEnv::new(TestConfig::default());
    env.agent.configure(|b| b.fail_execute = true);
    env.start();

    env.profilers
        .main_stage(|stage, p| stage.start_native_allocation_capture(p));
    env.profilers.settle();

    assert!(!env.profilers.has_pending_commands());
    assert!(matches!(
        tracker_state(&mut env, RecordingKind::NativeAllocations),
        RecordingState::Failed { .. }
    ));
    let error = env
        .profilers
        .main_stage(|stage, _| stage.options().last_error().map(str::to_string))
        .flatten()
        .expect("error is recorded");
    assert!(error.contains("transport unavailable"));
}

#[test]
fn test_legacy_allocation_tracking() {
    let mut env = TestEnv::new(TestConfig {
        feature_level: 25,
        ..TestConfig::default()
    });
    env.agent.configure(|b| {
        b.legacy_allocations = true;
        b.allocation_payload = Some(
            br#"[
                {"class_name": "com.example.Bitmap", "size": 4096},
                {"class_name": "com.example.Bitmap", "size": 4096},
                {"class_name": "java.lang.String", "size": 32}
            ]"#
            .to_vec(),
        );
    });
    env.start();
    let seen = observe(&mut env);

    let started = env.profilers.main_stage(|stage, p| {
        stage.enable_select_latest_capture(true);
        stage.start_java_kotlin_allocation_capture(p)
    });
    assert_eq!(started, Some(true));
    env.profilers.settle();
    assert_eq!(
        tracker_state(&mut env, RecordingKind::JavaAllocations),
        RecordingState::Recording {
            start_ns: 1_000_000_000
        }
    );
    assert!(seen
        .lock()
        .unwrap()
        .contains(&MemoryProfilerAspect::TrackingEnabled));

    env.agent.advance_ns(500_000_000);
    let elapsed = env
        .profilers
        .main_stage(|stage, p| stage.allocation_tracking_elapsed_time_ns(p));
    assert_eq!(elapsed, Some(500_000_000));

    env.profilers
        .main_stage(|stage, p| stage.stop_memory_recording(p));
    env.profilers.settle();

    assert_eq!(env.executed(), vec!["START_ALLOC_TRACKING", "STOP_ALLOC_TRACKING"]);
    assert_eq!(env.profilers.stage_type(), Some(StageType::Capture));
    let (kind, heap) = env
        .profilers
        .capture_stage(|stage, _| {
            let heap = stage.selection_mut().heap().map(|h| h.name.clone());
            (stage.duration().kind(), heap)
        })
        .expect("capture stage is active");
    assert_eq!(kind, CaptureKind::LegacyAllocation);
    assert_eq!(heap.as_deref(), Some("default"));
    assert_eq!(env.tracker.record_allocations.load(Ordering::SeqCst), 1);
}

#[test]
fn test_restores_running_recordings_on_enter() {
    let agent = Arc::new(InMemoryTransport::new());
    agent.add_event(
        STREAM_ID,
        Event::new(
            PID,
            500_000_000,
            EventData::AllocationsInfo(AllocationsInfo {
                start_time_ns: 500_000_000,
                end_time_ns: i64::MAX,
                legacy: true,
                success: true,
            }),
        )
        .with_group(500_000_000),
    );
    let mut env = TestEnv::with_agent(
        TestConfig {
            feature_level: 25,
            ..TestConfig::default()
        },
        agent,
    );
    env.start();

    assert_eq!(
        tracker_state(&mut env, RecordingKind::JavaAllocations),
        RecordingState::Recording {
            start_ns: 500_000_000
        }
    );
    let tracking = env
        .profilers
        .main_stage(|stage, _| stage.is_tracking_allocations());
    assert_eq!(tracking, Some(true));
}

#[test]
fn test_restores_native_recording_on_enter() {
    let agent = Arc::new(InMemoryTransport::new());
    agent.add_event(
        STREAM_ID,
        Event::new(
            PID,
            300_000_000,
            EventData::TraceStatus(TraceStatusData {
                start: Some(TraceStartStatus {
                    status: TraceStartCode::Success,
                    start_time_ns: 300_000_000,
                    ..TraceStartStatus::default()
                }),
                stop: None,
            }),
        ),
    );
    let mut env = TestEnv::with_agent(TestConfig::default(), agent);
    env.start();

    assert_eq!(
        tracker_state(&mut env, RecordingKind::NativeAllocations),
        RecordingState::Recording {
            start_ns: 300_000_000
        }
    );
    let (pending, tracking_changes) = env
        .profilers
        .main_stage(|stage, _| {
            (
                stage.pending_capture_start_ns(),
                stage.aspects().count(MemoryProfilerAspect::TrackingEnabled),
            )
        })
        .expect("main stage is active");
    assert_eq!(pending, 300_000_000);
    assert_eq!(tracking_changes, 1);
}

#[test]
fn test_recording_options_per_device() {
    let mut env = TestEnv::new(TestConfig {
        support_level: SupportLevel::Profileable,
        ..TestConfig::default()
    });
    env.start();
    let (titles, heap_dump_reason, native_reason) = env
        .profilers
        .main_stage(|stage, _| {
            let options = stage.options();
            let titles: Vec<String> = options
                .built_in_options()
                .iter()
                .map(|o| o.title.clone())
                .collect();
            (
                titles,
                options.not_ready_reason(HEAP_DUMP_TITLE).map(str::to_string),
                options.not_ready_reason(NATIVE_TITLE).map(str::to_string),
            )
        })
        .unwrap();
    assert_eq!(titles, vec![HEAP_DUMP_TITLE, NATIVE_TITLE, JAVA_KOTLIN_TITLE]);
    assert_eq!(
        heap_dump_reason.as_deref(),
        Some("Heap dump is not supported for profileable processes")
    );
    assert_eq!(native_reason, None);

    let mut x86 = TestEnv::new(TestConfig {
        cpu_abi: "x86_64".to_string(),
        ..TestConfig::default()
    });
    x86.start();
    let reason = x86
        .profilers
        .main_stage(|stage, _| stage.options().not_ready_reason(NATIVE_TITLE).map(str::to_string))
        .flatten();
    assert_eq!(reason.as_deref(), Some(X86_NATIVE_UNAVAILABLE));
    let started = x86
        .profilers
        .main_stage(|stage, p| stage.start_native_allocation_capture(p));
    assert_eq!(started, Some(false));

    let mut pre_q = TestEnv::new(TestConfig {
        feature_level: 28,
        ..TestConfig::default()
    });
    pre_q.start();
    let count = pre_q
        .profilers
        .main_stage(|stage, _| stage.options().built_in_options().len());
    assert_eq!(count, Some(2));
}

#[test]
fn test_selected_option_runs_its_action() {
    let mut env = TestEnv::new(TestConfig::default());
    env.agent
        .configure(|b| b.heap_dump_payload = Some(heap_snapshot()));
    env.start();

    let started = env.profilers.main_stage(|stage, p| {
        stage
            .options_mut()
            .select_built_in_option(HEAP_DUMP_TITLE)
            .unwrap();
        stage.start_recording(p)
    });
    assert_eq!(started, Some(true));
    env.profilers.settle();
    assert_eq!(env.executed(), vec!["HEAP_DUMP"]);
    assert_eq!(
        tracker_state(&mut env, RecordingKind::HeapDump),
        RecordingState::Idle
    );
}

#[test]
fn test_live_sampling_mode_follows_agent() {
    let mut env = TestEnv::new(TestConfig::default());
    env.start();

    let requested = env.profilers.main_stage(|stage, p| {
        stage.request_live_allocation_sampling_mode_update(
            p,
            memscope::stage::LiveAllocationSamplingMode::Full,
        )
    });
    assert_eq!(requested, Some(true));
    env.profilers.settle();

    let (mode, changes) = env
        .profilers
        .main_stage(|stage, _| {
            (
                stage.sampling_mode(),
                stage
                    .aspects()
                    .count(MemoryProfilerAspect::LiveAllocationSamplingMode),
            )
        })
        .unwrap();
    assert_eq!(mode, memscope::stage::LiveAllocationSamplingMode::Full);
    assert_eq!(changes, 1);

    env.profilers.end_session(2_000_000_000);
    let requested = env.profilers.main_stage(|stage, p| {
        stage.request_live_allocation_sampling_mode_update(
            p,
            memscope::stage::LiveAllocationSamplingMode::None,
        )
    });
    assert_eq!(requested, Some(false));
}

#[test]
fn test_clearing_selection_resets_timeline() {
    let mut env = TestEnv::new(TestConfig::default());
    env.start();
    env.profilers
        .timeline_mut()
        .set_selection(Range::new(10, 20));
    let cleared = env
        .profilers
        .main_stage(|stage, p| stage.select_capture_duration(p, None));
    assert_eq!(cleared, Some(true));
    assert!(env.profilers.timeline().selection().is_empty());
    let pending = env
        .profilers
        .main_stage(|stage, _| stage.pending_capture_start_ns());
    assert_eq!(pending, Some(INVALID_START_TIME));
}

//! Integration tests for the capture and allocation stages: selecting a
//! capture, loading it in the background and navigating its tree.

mod common;

use std::sync::Arc;

use common::{heap_snapshot, TestConfig, TestEnv, PID, STREAM_ID};
use memscope::capture::CaptureKind;
use memscope::series::CaptureDurationData;
use memscope::stage::{RecordingState, StageType};
use memscope::transport::{
    payload_id, AllocationAction, AllocationEvent, AllocationsInfo, Event, EventData, HeapDumpInfo,
    InMemoryTransport,
};
use memscope::units::{Range, OPEN_END};

fn heap_dump_event(start_ns: i64) -> Event {
    Event::new(
        PID,
        start_ns,
        EventData::HeapDump(HeapDumpInfo {
            start_time_ns: start_ns,
            end_time_ns: start_ns + 100_000_000,
            success: true,
        }),
    )
    .with_group(start_ns)
    .ended(true)
}

fn allocation(ts: i64, action: AllocationAction, id: u64, class_name: &str) -> Event {
    Event::new(
        PID,
        ts,
        EventData::Allocation(AllocationEvent {
            action,
            instance_id: id,
            class_name: class_name.to_string(),
            heap: "app".to_string(),
            size: 128,
        }),
    )
}

fn main_captures(env: &mut TestEnv) -> Vec<CaptureDurationData> {
    env.profilers
        .main_stage(|stage, _| stage.captures().iter().map(|d| d.value.clone()).collect())
        .unwrap_or_default()
}

#[test]
fn test_capture_load_failure_returns_to_main() {
    let mut env = TestEnv::new(TestConfig::default());
    env.start();

    // No payload is stored, so the dump cannot be fetched.
    env.profilers.main_stage(|stage, p| {
        stage.enable_select_latest_capture(true);
        stage.request_heap_dump(p)
    });
    env.profilers.settle();

    assert_eq!(env.profilers.stage_type(), Some(StageType::Main));
    assert!(env.profilers.timeline().selection().is_empty());
}

#[test]
fn test_payload_polled_until_ready() {
    let mut env = TestEnv::new(TestConfig::default());
    env.agent.configure(|b| {
        b.heap_dump_payload = Some(heap_snapshot());
        b.payload_not_ready_polls = 3;
    });
    env.start();

    env.profilers.main_stage(|stage, p| {
        stage.enable_select_latest_capture(true);
        stage.request_heap_dump(p)
    });
    env.profilers.settle();

    assert_eq!(env.profilers.stage_type(), Some(StageType::Capture));
    let loaded = env
        .profilers
        .capture_stage(|stage, _| stage.selection_mut().is_loaded());
    assert_eq!(loaded, Some(true));
}

#[test]
fn test_capture_stage_filter_and_reselect() {
    let agent = Arc::new(InMemoryTransport::new());
    for start in [200_000_000, 600_000_000] {
        agent.add_event(STREAM_ID, heap_dump_event(start));
        agent.add_payload(&payload_id(start), heap_snapshot(), 0);
    }
    let mut env = TestEnv::with_agent(TestConfig::default(), agent);
    env.start();

    let captures = main_captures(&mut env);
    assert_eq!(captures.len(), 2);
    assert!(captures.iter().all(|d| d.kind() == CaptureKind::HeapDump));

    let first = captures[0].clone();
    let selected = env
        .profilers
        .main_stage(|stage, p| stage.select_capture_duration(p, Some(first)));
    assert_eq!(selected, Some(true));
    env.profilers.settle();
    assert_eq!(env.profilers.stage_type(), Some(StageType::Capture));
    assert_eq!(env.profilers.timeline().selection(), Range::new(200_000, 300_000));

    let (all, filtered, heap) = env
        .profilers
        .capture_stage(|stage, _| {
            let all = {
                let tree = stage.selection_mut().tree_mut().expect("tree is built");
                let root = tree.root();
                tree.child_count(root)
            };
            stage.set_class_filter(Some("Cache")).unwrap();
            let filtered = {
                let tree = stage.selection_mut().tree_mut().expect("tree is rebuilt");
                let root = tree.root();
                tree.child_count(root)
            };
            let zygote = stage.select_heap("zygote");
            (all, filtered, zygote)
        })
        .unwrap();
    assert_eq!(all, 2);
    assert_eq!(filtered, 1);
    assert!(heap);

    let bad_filter = env
        .profilers
        .capture_stage(|stage, _| stage.set_class_filter(Some("(")).is_err());
    assert_eq!(bad_filter, Some(true));

    let second = captures[1].clone();
    let reselected = env
        .profilers
        .capture_stage(|stage, p| stage.select_capture_duration(p, second));
    assert_eq!(reselected, Some(true));
    env.profilers.settle();

    let (start_ns, loaded) = env
        .profilers
        .capture_stage(|stage, _| {
            (
                stage.duration().entry.key().start_time_ns(),
                stage.selection_mut().is_loaded(),
            )
        })
        .unwrap();
    assert_eq!(start_ns, 600_000_000);
    assert!(loaded);
    assert_eq!(env.profilers.timeline().selection(), Range::new(600_000, 700_000));
    assert_eq!(
        *env.tracker.selected.lock().unwrap(),
        vec![CaptureKind::HeapDump]
    );
}

#[test]
fn test_live_allocation_recording() {
    let mut env = TestEnv::new(TestConfig::default());
    env.start();

    let started = env
        .profilers
        .main_stage(|stage, p| stage.start_java_kotlin_allocation_capture(p));
    assert_eq!(started, Some(true));
    env.profilers.settle();
    assert_eq!(env.profilers.stage_type(), Some(StageType::Allocation));
    assert_eq!(env.executed(), vec!["START_ALLOC_TRACKING"]);

    let state = env
        .profilers
        .allocation_stage(|stage, _| stage.tracker().state().clone());
    assert_eq!(
        state,
        Some(RecordingState::Recording {
            start_ns: 1_000_000_000
        })
    );

    env.agent.add_event(
        STREAM_ID,
        allocation(1_100_000_000, AllocationAction::Alloc, 1, "com.example.Bitmap"),
    );
    env.agent.add_event(
        STREAM_ID,
        allocation(1_200_000_000, AllocationAction::Alloc, 2, "java.lang.String"),
    );
    env.agent.add_event(
        STREAM_ID,
        allocation(1_300_000_000, AllocationAction::Free, 2, "java.lang.String"),
    );
    env.agent.advance_ns(500_000_000);

    let selected = env.profilers.allocation_stage(|stage, p| {
        stage.select_range(p, Range::new(1_000_000, 1_150_000))
    });
    assert_eq!(selected, Some(true));
    env.profilers.settle();
    let live_classes = env
        .profilers
        .allocation_stage(|stage, _| {
            let tree = stage.selection_mut().tree_mut()?;
            let root = tree.root();
            Some(tree.child_count(root))
        })
        .flatten();
    assert_eq!(live_classes, Some(1));

    let stopped = env
        .profilers
        .allocation_stage(|stage, p| stage.stop_tracking(p));
    assert_eq!(stopped, Some(true));
    env.profilers.settle();

    assert_eq!(env.executed(), vec!["START_ALLOC_TRACKING", "STOP_ALLOC_TRACKING"]);
    let (live, end_ns, classes) = env
        .profilers
        .allocation_stage(|stage, _| {
            let classes = stage.selection_mut().tree_mut().map(|tree| {
                let root = tree.root();
                tree.child_count(root)
            });
            (stage.is_live(), stage.end_ns(), classes)
        })
        .expect("allocation stage is active");
    assert!(!live);
    assert_eq!(end_ns, Some(1_500_000_000));
    assert_eq!(classes, Some(2));
    assert_eq!(env.profilers.timeline().selection(), Range::new(1_000_000, 1_500_000));
}

#[test]
fn test_select_open_live_recording_attaches() {
    let agent = Arc::new(InMemoryTransport::new());
    agent.add_event(
        STREAM_ID,
        Event::new(
            PID,
            500_000_000,
            EventData::AllocationsInfo(AllocationsInfo {
                start_time_ns: 500_000_000,
                end_time_ns: OPEN_END,
                legacy: false,
                success: true,
            }),
        )
        .with_group(500_000_000),
    );
    let mut env = TestEnv::with_agent(TestConfig::default(), agent);
    env.start();

    let open = main_captures(&mut env)
        .into_iter()
        .find(|d| d.kind() == CaptureKind::LiveAllocation)
        .expect("live recording is listed");
    assert!(open.is_open());
    assert!(open.is_selectable());

    env.profilers
        .main_stage(|stage, p| stage.select_capture_duration(p, Some(open)));
    env.profilers.settle();

    let (live, state, elapsed) = env
        .profilers
        .allocation_stage(|stage, p| {
            (
                stage.is_live(),
                stage.tracker().state().clone(),
                stage.elapsed_time_ns(p),
            )
        })
        .expect("allocation stage is active");
    assert!(live);
    assert_eq!(
        state,
        RecordingState::Recording {
            start_ns: 500_000_000
        }
    );
    assert_eq!(elapsed, 500_000_000);
    assert!(env.executed().is_empty());
}

#[test]
fn test_open_heap_dump_is_not_selectable() {
    let agent = Arc::new(InMemoryTransport::new());
    agent.add_event(
        STREAM_ID,
        Event::new(
            PID,
            400_000_000,
            EventData::HeapDump(HeapDumpInfo {
                start_time_ns: 400_000_000,
                end_time_ns: OPEN_END,
                success: true,
            }),
        )
        .with_group(400_000_000),
    );
    let mut env = TestEnv::with_agent(TestConfig::default(), agent);
    env.start();

    let open = main_captures(&mut env)
        .into_iter()
        .next()
        .expect("heap dump is listed");
    let selected = env
        .profilers
        .main_stage(|stage, p| stage.select_capture_duration(p, Some(open)));
    assert_eq!(selected, Some(false));
    env.profilers.settle();
    assert_eq!(env.profilers.stage_type(), Some(StageType::Main));
}

#[test]
fn test_rejected_live_stop_stays_in_stage() {
    let mut env = TestEnv::new(TestConfig::default());
    env.start();
    env.profilers
        .main_stage(|stage, p| stage.start_java_kotlin_allocation_capture(p));
    env.profilers.settle();

    env.agent.configure(|b| b.fail_execute = true);
    let stopped = env
        .profilers
        .allocation_stage(|stage, p| stage.stop_tracking(p));
    assert_eq!(stopped, Some(true));
    env.profilers.settle();

    assert_eq!(env.profilers.stage_type(), Some(StageType::Allocation));
    let (live, state) = env
        .profilers
        .allocation_stage(|stage, _| (stage.is_live(), stage.tracker().state().clone()))
        .expect("allocation stage is active");
    assert!(live);
    assert_eq!(
        state,
        RecordingState::Recording {
            start_ns: 1_000_000_000
        }
    );
}

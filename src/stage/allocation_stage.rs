//! Live allocation tracking (O and later), and the static view of a finished
//! live recording.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::recording::{RecordingKind, RecordingTracker};
use super::{
    back_to_main, elapsed_since, AspectModel, CaptureSelection, LoadEvent, MemoryProfilerAspect,
    Stage, StageController, StatusAction,
};
use crate::capture::{LiveAllocationCaptureObject, SharedCapture};
use crate::profilers::{Profilers, HAS_USED_MEMORY_CAPTURE};
use crate::series::{CaptureDurationData, CaptureEntry, CaptureKey};
use crate::transport::{
    AllocationsInfo, CommandKind, EventData, MatchedStatus, TrackStatus, TrackStatusCode,
};
use crate::units::{duration_us, ns_to_us, Range, INVALID_START_TIME, OPEN_END};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Live { attach_start_ns: Option<i64> },
    Static { end_ns: i64 },
}

pub struct AllocationStage {
    mode: Mode,
    tracker: RecordingTracker,
    start_ns: i64,
    selection: CaptureSelection,
    aspects: AspectModel,
}

impl AllocationStage {
    fn with_mode(mode: Mode, start_ns: i64) -> Self {
        Self {
            mode,
            tracker: RecordingTracker::new(RecordingKind::JavaAllocations),
            start_ns,
            selection: CaptureSelection::new(),
            aspects: AspectModel::new(),
        }
    }

    /// A stage that starts live tracking when entered.
    pub fn make_live_stage() -> Self {
        Self::with_mode(Mode::Live { attach_start_ns: None }, INVALID_START_TIME)
    }

    /// A stage that follows tracking the agent already runs since `start_ns`.
    pub fn attach_live(start_ns: i64) -> Self {
        Self::with_mode(
            Mode::Live {
                attach_start_ns: Some(start_ns),
            },
            start_ns,
        )
    }

    /// A stage showing the finished recording `[start_ns, end_ns]`.
    pub fn make_static_stage(start_ns: i64, end_ns: i64) -> Self {
        Self::with_mode(Mode::Static { end_ns }, start_ns)
    }

    pub fn is_live(&self) -> bool {
        matches!(self.mode, Mode::Live { .. })
    }

    /// Start of the recording, or [`INVALID_START_TIME`] until tracking has
    /// started.
    pub fn start_ns(&self) -> i64 {
        self.start_ns
    }

    pub fn end_ns(&self) -> Option<i64> {
        match self.mode {
            Mode::Static { end_ns } => Some(end_ns),
            Mode::Live { .. } => None,
        }
    }

    pub fn tracker(&self) -> &RecordingTracker {
        &self.tracker
    }

    pub fn selection_mut(&mut self) -> &mut CaptureSelection {
        &mut self.selection
    }

    pub fn aspects(&self) -> &AspectModel {
        &self.aspects
    }

    pub fn aspects_mut(&mut self) -> &mut AspectModel {
        &mut self.aspects
    }

    /// Nanoseconds since tracking started, or [`INVALID_START_TIME`].
    pub fn elapsed_time_ns(&self, p: &Profilers) -> i64 {
        match self.tracker.start_ns() {
            Some(start_ns) => elapsed_since(p, start_ns),
            None => INVALID_START_TIME,
        }
    }

    fn start_tracking(&mut self, p: &mut Profilers) -> bool {
        let command_id = p.next_command_id();
        if let Err(e) = self.tracker.request_start(command_id) {
            warn!("{}", e);
            return false;
        }
        p.issue_command(
            command_id,
            CommandKind::StartAllocTracking,
            StatusAction::TrackAllocations { enable: true },
        );
        p.timeline_mut().set_streaming(true);
        p.services().set_bool(HAS_USED_MEMORY_CAPTURE, true);
        p.services().feature_tracker().track_record_allocations();
        true
    }

    /// Asks the agent to stop live tracking. The stage turns static once the
    /// stop is acknowledged.
    pub fn stop_tracking(&mut self, p: &mut Profilers) -> bool {
        if !self.is_live() {
            return false;
        }
        let command_id = p.next_command_id();
        if let Err(e) = self.tracker.request_stop(command_id) {
            warn!("{}", e);
            return false;
        }
        p.issue_command(
            command_id,
            CommandKind::StopAllocTracking,
            StatusAction::TrackAllocations { enable: false },
        );
        true
    }

    /// Shows allocations of the live recording inside `range` (microseconds).
    pub fn select_range(&mut self, p: &mut Profilers, range: Range) -> bool {
        if !self.is_live() || self.tracker.start_ns().is_none() {
            debug!("No live recording to select from");
            return false;
        }
        let duration = live_duration(p, self.start_ns, OPEN_END);
        self.selection.clear(&mut self.aspects);
        p.timeline_mut().set_selection(range);
        self.selection
            .select_capture(Some(duration), range, p.joiner(), &mut self.aspects)
    }

    /// A failed start leaves the stage; a failed stop keeps tracking live.
    fn fail_request(&mut self, p: &mut Profilers, command_id: i64, reason: impl Into<String>) {
        if self.tracker.on_failed(command_id, reason) && !self.tracker.is_recording() {
            back_to_main(p);
        }
    }

    fn handle_track_status(
        &mut self,
        p: &mut Profilers,
        command_id: i64,
        enable: bool,
        status: TrackStatus,
        timestamp_ns: i64,
    ) {
        let succeeded = matches!(
            status.status,
            TrackStatusCode::Success | TrackStatusCode::InProgress
        );
        if !succeeded {
            let reason = format!("Live allocation tracking request failed: {:?}", status.status);
            self.fail_request(p, command_id, reason);
            return;
        }

        if enable {
            match self.tracker.on_started(command_id, status.start_time_ns) {
                Ok(true) => {
                    self.start_ns = status.start_time_ns;
                    self.aspects.changed(MemoryProfilerAspect::TrackingEnabled);
                }
                Ok(false) => debug!("Repeated tracking status for command {}", command_id),
                Err(e) => debug!("{}", e),
            }
        } else {
            match self.tracker.on_stopped(command_id) {
                Ok(true) => {
                    self.aspects.changed(MemoryProfilerAspect::TrackingEnabled);
                    info!("Live recording {}..{} finished", self.start_ns, timestamp_ns);
                    let finished = AllocationStage::make_static_stage(self.start_ns, timestamp_ns);
                    p.set_stage(Stage::Allocation(Box::new(finished)));
                }
                Ok(false) => debug!("Repeated tracking status for command {}", command_id),
                Err(e) => debug!("{}", e),
            }
        }
    }
}

impl StageController for AllocationStage {
    fn enter(&mut self, p: &mut Profilers) {
        self.selection.start();
        match self.mode {
            Mode::Live {
                attach_start_ns: Some(start_ns),
            } => {
                self.tracker.restore(start_ns);
                p.timeline_mut().set_streaming(true);
            }
            Mode::Live {
                attach_start_ns: None,
            } => {
                if !self.start_tracking(p) {
                    back_to_main(p);
                }
            }
            Mode::Static { end_ns } => {
                let range = Range::new(ns_to_us(self.start_ns), ns_to_us(end_ns));
                let duration = live_duration(p, self.start_ns, end_ns);
                p.timeline_mut().set_selection(range);
                self.selection
                    .select_capture(Some(duration), range, p.joiner(), &mut self.aspects);
            }
        }
    }

    fn exit(&mut self, p: &mut Profilers) {
        if self.is_live() && self.tracker.is_recording() && !self.tracker.is_requesting() {
            self.stop_tracking(p);
        }
        self.selection.stop(&mut self.aspects);
    }

    fn update(&mut self, p: &mut Profilers) {
        match self.selection.poll(&mut self.aspects) {
            Some(LoadEvent::Failed) if !self.is_live() => {
                warn!("Allocation recording at {} failed to load", self.start_ns);
                p.timeline_mut().clear_selection();
                back_to_main(p);
            }
            Some(LoadEvent::Failed) => warn!("Live allocations failed to load"),
            Some(LoadEvent::Loaded) | None => {}
        }
    }

    fn on_status(&mut self, p: &mut Profilers, status: MatchedStatus<StatusAction>) {
        let MatchedStatus {
            command_id,
            action,
            event,
        } = status;
        match (action, event.data) {
            (StatusAction::TrackAllocations { enable }, EventData::AllocTrackingStatus(s)) => {
                self.handle_track_status(p, command_id, enable, s, event.timestamp_ns)
            }
            (action, data) => debug!("Ignoring {:?} status for {:?}", data.kind(), action),
        }
    }

    fn on_command_failed(
        &mut self,
        p: &mut Profilers,
        command_id: i64,
        _action: StatusAction,
        error: &str,
    ) {
        self.fail_request(p, command_id, error);
    }

    fn selection(&self) -> Option<&CaptureSelection> {
        Some(&self.selection)
    }
}

fn live_duration(p: &Profilers, start_ns: i64, end_ns: i64) -> CaptureDurationData {
    let key = CaptureKey::Allocations(AllocationsInfo {
        start_time_ns: start_ns,
        end_time_ns: end_ns,
        legacy: false,
        success: true,
    });
    let client = p.client();
    let session = p.session().clone();
    let entry = CaptureEntry::new(key, move || -> SharedCapture {
        Arc::new(LiveAllocationCaptureObject::new(
            client.clone(),
            session.clone(),
            start_ns,
            end_ns,
        ))
    });
    CaptureDurationData::new(duration_us(start_ns, end_ns), true, entry)
}

//! Stage controllers: the main memory stage that drives recordings, and the
//! capture and allocation stages that inspect one capture each.
//!
//! Stages run on the owning thread only. They issue commands through
//! [`Profilers::issue_command`] and receive the matching status events
//! through [`StageController::on_status`].

pub mod allocation_stage;
pub mod aspect;
pub mod capture_stage;
pub mod main_stage;
pub mod options;
pub mod recording;
pub mod sampling;
pub mod selection;

use tracing::{debug, warn};

pub use allocation_stage::AllocationStage;
pub use aspect::{AspectModel, MemoryProfilerAspect};
pub use capture_stage::MemoryCaptureStage;
pub use main_stage::MainMemoryProfilerStage;
pub use options::{RecordingAction, RecordingOption, RecordingOptionsModel};
pub use recording::{RecordingKind, RecordingOp, RecordingState, RecordingTracker, TransitionError};
pub use sampling::LiveAllocationSamplingMode;
pub use selection::{CaptureSelection, LoadEvent};

use crate::profilers::Profilers;
use crate::transport::{EventKind, MatchedStatus};
use crate::units::INVALID_START_TIME;

/// What to do once a command's status event arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusAction {
    HeapDump,
    TrackAllocations { enable: bool },
    StartNativeTracking,
    StopNativeTracking,
    SetSamplingMode(LiveAllocationSamplingMode),
}

impl StatusAction {
    /// The event kind that carries this command's status.
    pub fn status_kind(&self) -> EventKind {
        match self {
            StatusAction::HeapDump => EventKind::MemoryHeapDumpStatus,
            StatusAction::TrackAllocations { .. } => EventKind::MemoryAllocTrackingStatus,
            StatusAction::StartNativeTracking | StatusAction::StopNativeTracking => {
                EventKind::TraceStatus
            }
            StatusAction::SetSamplingMode(_) => EventKind::MemoryAllocSampling,
        }
    }
}

pub trait StageController {
    fn enter(&mut self, profilers: &mut Profilers);

    fn exit(&mut self, profilers: &mut Profilers);

    fn update(&mut self, profilers: &mut Profilers);

    fn on_status(&mut self, _profilers: &mut Profilers, status: MatchedStatus<StatusAction>) {
        debug!(
            "Ignoring status of command {} ({:?})",
            status.command_id, status.action
        );
    }

    fn on_command_failed(
        &mut self,
        _profilers: &mut Profilers,
        command_id: i64,
        action: StatusAction,
        error: &str,
    ) {
        debug!("Ignoring failure of command {} ({:?}): {}", command_id, action, error);
    }

    /// The capture this stage inspects, if it owns one.
    fn selection(&self) -> Option<&CaptureSelection> {
        None
    }

    fn wait_for_load(&self) {
        if let Some(selection) = self.selection() {
            selection.wait_for_load();
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageType {
    Main,
    Capture,
    Allocation,
}

pub enum Stage {
    Main(Box<MainMemoryProfilerStage>),
    Capture(Box<MemoryCaptureStage>),
    Allocation(Box<AllocationStage>),
}

impl Stage {
    pub fn stage_type(&self) -> StageType {
        match self {
            Stage::Main(_) => StageType::Main,
            Stage::Capture(_) => StageType::Capture,
            Stage::Allocation(_) => StageType::Allocation,
        }
    }

    pub fn controller(&self) -> &dyn StageController {
        match self {
            Stage::Main(stage) => &**stage,
            Stage::Capture(stage) => &**stage,
            Stage::Allocation(stage) => &**stage,
        }
    }

    pub fn controller_mut(&mut self) -> &mut dyn StageController {
        match self {
            Stage::Main(stage) => &mut **stage,
            Stage::Capture(stage) => &mut **stage,
            Stage::Allocation(stage) => &mut **stage,
        }
    }
}

/// Nanoseconds since `start_ns` on the agent's clock, or
/// [`INVALID_START_TIME`] if the clock cannot be read. Blocks on a round trip.
pub(crate) fn elapsed_since(profilers: &Profilers, start_ns: i64) -> i64 {
    match profilers
        .client()
        .get_current_time(profilers.session().stream_id)
    {
        Ok(now_ns) => now_ns.saturating_sub(start_ns),
        Err(e) => {
            warn!("Failed to read agent time: {:#}", e);
            INVALID_START_TIME
        }
    }
}

/// Leaves the current stage for a fresh main stage.
pub(crate) fn back_to_main(profilers: &mut Profilers) {
    let main = MainMemoryProfilerStage::new(profilers);
    profilers.set_stage(Stage::Main(Box::new(main)));
}

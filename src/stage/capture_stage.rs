//! Inspects one finished capture: a heap dump, a legacy allocation recording
//! or a native allocation sample.

use tracing::{info, warn};

use super::{back_to_main, AspectModel, CaptureSelection, LoadEvent, StageController};
use crate::profilers::Profilers;
use crate::series::CaptureDurationData;
use crate::units::{ns_to_us, Range};

pub struct MemoryCaptureStage {
    duration: CaptureDurationData,
    /// Capture start on the timeline, in microseconds.
    x: i64,
    selection: CaptureSelection,
    aspects: AspectModel,
}

impl MemoryCaptureStage {
    pub fn new(duration: CaptureDurationData) -> Self {
        let x = ns_to_us(duration.entry.key().start_time_ns());
        Self {
            duration,
            x,
            selection: CaptureSelection::new(),
            aspects: AspectModel::new(),
        }
    }

    pub fn duration(&self) -> &CaptureDurationData {
        &self.duration
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

    /// Timeline span of the capture in microseconds.
    pub fn capture_range(&self) -> Range {
        Range::new(self.x, self.x.saturating_add(self.duration.duration_us))
    }

    /// Picks another capture without leaving the stage. Returns `false` if it
    /// is already shown or belongs to another stage.
    pub fn select_capture_duration(
        &mut self,
        p: &mut Profilers,
        duration: CaptureDurationData,
    ) -> bool {
        if !duration.kind().opens_capture_stage() {
            warn!("{:?} captures are not shown in the capture stage", duration.kind());
            return false;
        }
        if duration == self.duration {
            return false;
        }
        self.x = ns_to_us(duration.entry.key().start_time_ns());
        self.duration = duration;
        self.load(p)
    }

    pub fn select_heap(&mut self, name: &str) -> bool {
        self.selection.select_heap(name, &mut self.aspects)
    }

    pub fn set_class_filter(&mut self, pattern: Option<&str>) -> anyhow::Result<()> {
        self.selection.set_class_filter(pattern, &mut self.aspects)
    }

    fn load(&mut self, p: &mut Profilers) -> bool {
        let range = self.capture_range();
        p.timeline_mut().set_selection(range);
        self.selection.select_capture(
            Some(self.duration.clone()),
            range,
            p.joiner(),
            &mut self.aspects,
        )
    }
}

impl StageController for MemoryCaptureStage {
    fn enter(&mut self, p: &mut Profilers) {
        self.selection.start();
        self.load(p);
    }

    fn exit(&mut self, _p: &mut Profilers) {
        self.selection.stop(&mut self.aspects);
    }

    fn update(&mut self, p: &mut Profilers) {
        match self.selection.poll(&mut self.aspects) {
            Some(LoadEvent::Failed) => {
                warn!("Capture at {} failed to load, returning to the main stage", self.x);
                p.timeline_mut().clear_selection();
                back_to_main(p);
            }
            Some(LoadEvent::Loaded) => info!("Capture at {} is ready", self.x),
            None => {}
        }
    }

    fn selection(&self) -> Option<&CaptureSelection> {
        Some(&self.selection)
    }
}

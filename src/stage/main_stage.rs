//! The main memory stage: starts and stops recordings, follows their status
//! events, and routes a selected capture to the stage that inspects it.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::options::{
    profileable_unsupported, RecordingAction, RecordingOption, RecordingOptionsModel,
    HEAP_DUMP_TITLE, JAVA_KOTLIN_TITLE, NATIVE_TITLE, X86_NATIVE_UNAVAILABLE,
};
use super::recording::{RecordingKind, RecordingTracker};
use super::{
    elapsed_since, AllocationStage, AspectModel, LiveAllocationSamplingMode, MemoryCaptureStage,
    MemoryProfilerAspect, Stage, StageController, StatusAction,
};
use crate::capture::CaptureKind;
use crate::profilers::{Profilers, HAS_USED_MEMORY_CAPTURE};
use crate::series::{
    AllocationSamplingRateDataSeries, CaptureDataSeries, CaptureDurationData, DataSeries,
    SeriesData,
};
use crate::session::{Feature, Session, FEATURE_LEVEL_O, FEATURE_LEVEL_Q};
use crate::transport::{
    AllocationSamplingRate, CommandKind, EventData, EventKind, EventQuery, HeapDumpStatus,
    HeapDumpStatusCode, MatchedStatus, TraceConfiguration, TraceStartCode, TraceStartStatus,
    TraceStatusData, TraceStopCode, TraceStopStatus, TrackStatus, TrackStatusCode,
    TransportClient,
};
use crate::units::{Range, INVALID_START_TIME};

/// Results of round trips the stage runs on the dispatch pool.
enum StageMessage {
    Restored {
        legacy_tracking_start_ns: Option<i64>,
        native_start_ns: Option<i64>,
    },
    Refreshed {
        captures: Vec<SeriesData<CaptureDurationData>>,
        sampling_interval: Option<i32>,
    },
}

pub struct MainMemoryProfilerStage {
    options: RecordingOptionsModel,
    heap_dump: RecordingTracker,
    java: RecordingTracker,
    native: RecordingTracker,
    aspects: AspectModel,
    heap_dump_series: Arc<CaptureDataSeries>,
    allocation_series: Arc<CaptureDataSeries>,
    native_series: Arc<CaptureDataSeries>,
    sampling_series: Arc<AllocationSamplingRateDataSeries>,
    live_allocation: bool,
    pending_capture_start_ns: i64,
    pending_legacy_allocation_start_ns: i64,
    select_latest: bool,
    sampling_mode: LiveAllocationSamplingMode,
    captures: Vec<SeriesData<CaptureDurationData>>,
    tx: Sender<StageMessage>,
    rx: Receiver<StageMessage>,
    refresh_in_flight: bool,
}

impl MainMemoryProfilerStage {
    pub fn new(p: &Profilers) -> Self {
        let client = p.client();
        let session = p.session().clone();
        let config = p.config();
        let live_allocation = p.device().feature_level >= FEATURE_LEVEL_O;
        let allocation_series = if live_allocation {
            CaptureDataSeries::of_allocation_infos(client.clone(), session.clone())
        } else {
            CaptureDataSeries::of_legacy_allocation_infos(
                client.clone(),
                session.clone(),
                config.poll_interval(),
            )
        };
        let (tx, rx) = channel();
        Self {
            options: RecordingOptionsModel::new(),
            heap_dump: RecordingTracker::new(RecordingKind::HeapDump),
            java: RecordingTracker::new(RecordingKind::JavaAllocations),
            native: RecordingTracker::new(RecordingKind::NativeAllocations),
            aspects: AspectModel::new(),
            heap_dump_series: Arc::new(CaptureDataSeries::of_heap_dump_samples(
                client.clone(),
                session.clone(),
                config.hprof_policy(),
            )),
            allocation_series: Arc::new(allocation_series),
            native_series: Arc::new(CaptureDataSeries::of_native_allocation_samples(
                client.clone(),
                session.clone(),
                config.poll_interval(),
            )),
            sampling_series: Arc::new(AllocationSamplingRateDataSeries::new(client, session)),
            live_allocation,
            pending_capture_start_ns: INVALID_START_TIME,
            pending_legacy_allocation_start_ns: INVALID_START_TIME,
            select_latest: false,
            sampling_mode: config.live_allocation_sampling,
            captures: Vec::new(),
            tx,
            rx,
            refresh_in_flight: false,
        }
    }

    pub fn options(&self) -> &RecordingOptionsModel {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut RecordingOptionsModel {
        &mut self.options
    }

    pub fn aspects(&self) -> &AspectModel {
        &self.aspects
    }

    pub fn aspects_mut(&mut self) -> &mut AspectModel {
        &mut self.aspects
    }

    pub fn tracker(&self, kind: RecordingKind) -> &RecordingTracker {
        match kind {
            RecordingKind::HeapDump => &self.heap_dump,
            RecordingKind::JavaAllocations => &self.java,
            RecordingKind::NativeAllocations => &self.native,
        }
    }

    pub fn heap_dump_series(&self) -> &CaptureDataSeries {
        &self.heap_dump_series
    }

    /// Live allocation durations on O and later, legacy recordings before.
    pub fn allocation_series(&self) -> &CaptureDataSeries {
        &self.allocation_series
    }

    pub fn native_series(&self) -> &CaptureDataSeries {
        &self.native_series
    }

    pub fn sampling_series(&self) -> &AllocationSamplingRateDataSeries {
        &self.sampling_series
    }

    /// Every capture duration seen by the latest refresh, ascending by start.
    pub fn captures(&self) -> &[SeriesData<CaptureDurationData>] {
        &self.captures
    }

    pub fn supports_live_allocation(&self) -> bool {
        self.live_allocation
    }

    pub fn sampling_mode(&self) -> LiveAllocationSamplingMode {
        self.sampling_mode
    }

    pub fn pending_capture_start_ns(&self) -> i64 {
        self.pending_capture_start_ns
    }

    pub fn is_tracking_allocations(&self) -> bool {
        self.java.is_recording()
    }

    pub fn has_user_used_memory_capture(&self, p: &Profilers) -> bool {
        p.services().get_bool(HAS_USED_MEMORY_CAPTURE, false)
    }

    /// Selects the next capture that finishes at the pending start time.
    pub fn enable_select_latest_capture(&mut self, enable: bool) {
        self.select_latest = enable;
    }

    fn build_options(&mut self, p: &Profilers) {
        let support = p.support_level();
        let unsupported = |feature: Feature| {
            (!support.is_feature_supported(feature)).then(|| profileable_unsupported(feature.title()))
        };

        self.options = RecordingOptionsModel::new();
        self.options.add_built_in_option(RecordingOption::heap_dump());
        self.options
            .set_option_not_ready(HEAP_DUMP_TITLE, unsupported(Feature::HeapDump));
        if p.device().feature_level >= FEATURE_LEVEL_Q {
            self.options
                .add_built_in_option(RecordingOption::native_allocations());
            let reason = if p.device().is_x86() {
                Some(X86_NATIVE_UNAVAILABLE.to_string())
            } else {
                unsupported(Feature::NativeRecording)
            };
            self.options.set_option_not_ready(NATIVE_TITLE, reason);
        }
        self.options
            .add_built_in_option(RecordingOption::java_kotlin_allocations());
        self.options
            .set_option_not_ready(JAVA_KOTLIN_TITLE, unsupported(Feature::JvmRecording));
    }

    /// Runs the start action of the selected option.
    pub fn start_recording(&mut self, p: &mut Profilers) -> bool {
        match self.options.start() {
            Some(action) => self.run_action(p, action),
            None => false,
        }
    }

    /// Runs the stop action of the selected option.
    pub fn stop_recording(&mut self, p: &mut Profilers) -> bool {
        match self.options.stop() {
            Some(action) => self.run_action(p, action),
            None => false,
        }
    }

    fn run_action(&mut self, p: &mut Profilers, action: RecordingAction) -> bool {
        match action {
            RecordingAction::HeapDump => self.start_heap_dump_capture(p),
            RecordingAction::ToggleNative => self.toggle_native_allocation_tracking(p),
            RecordingAction::ToggleJavaKotlin if self.java.is_recording() => {
                self.track_allocations(p, false)
            }
            RecordingAction::ToggleJavaKotlin => self.start_java_kotlin_allocation_capture(p),
        }
    }

    pub fn start_heap_dump_capture(&mut self, p: &mut Profilers) -> bool {
        if !p.support_level().is_feature_supported(Feature::HeapDump) {
            warn!("Heap dumps are not supported for this process");
            return false;
        }
        self.request_heap_dump(p)
    }

    pub fn request_heap_dump(&mut self, p: &mut Profilers) -> bool {
        let command_id = p.next_command_id();
        if let Err(e) = self.heap_dump.request_start(command_id) {
            warn!("{}", e);
            return false;
        }
        p.issue_command(command_id, CommandKind::HeapDump, StatusAction::HeapDump);
        p.timeline_mut().set_streaming(true);
        p.services().set_bool(HAS_USED_MEMORY_CAPTURE, true);
        p.services().feature_tracker().track_dump_heap();
        true
    }

    /// Java/Kotlin recording: the allocation stage on O and later, legacy
    /// tracking before.
    pub fn start_java_kotlin_allocation_capture(&mut self, p: &mut Profilers) -> bool {
        if !p.support_level().is_feature_supported(Feature::JvmRecording) {
            warn!("Java/Kotlin allocation recording is not supported for this process");
            return false;
        }
        if self.live_allocation {
            p.set_stage(Stage::Allocation(Box::new(AllocationStage::make_live_stage())));
            true
        } else {
            self.track_allocations(p, true)
        }
    }

    /// Starts or stops legacy allocation tracking.
    pub fn track_allocations(&mut self, p: &mut Profilers, enable: bool) -> bool {
        let command_id = p.next_command_id();
        let requested = if enable {
            self.java.request_start(command_id)
        } else {
            self.java.request_stop(command_id)
        };
        if let Err(e) = requested {
            warn!("{}", e);
            return false;
        }
        let kind = if enable {
            CommandKind::StartAllocTracking
        } else {
            CommandKind::StopAllocTracking
        };
        p.issue_command(command_id, kind, StatusAction::TrackAllocations { enable });
        if enable {
            p.timeline_mut().set_streaming(true);
            p.services().set_bool(HAS_USED_MEMORY_CAPTURE, true);
            p.services().feature_tracker().track_record_allocations();
        }
        true
    }

    pub fn start_native_allocation_capture(&mut self, p: &mut Profilers) -> bool {
        if p.device().feature_level < FEATURE_LEVEL_Q {
            warn!("Native allocation recording needs API level {}", FEATURE_LEVEL_Q);
            return false;
        }
        if p.device().is_x86() {
            warn!("{}", X86_NATIVE_UNAVAILABLE);
            return false;
        }
        if !p.support_level().is_feature_supported(Feature::NativeRecording) {
            warn!("Native allocation recording is not supported for this process");
            return false;
        }
        let command_id = p.next_command_id();
        if let Err(e) = self.native.request_start(command_id) {
            warn!("{}", e);
            return false;
        }
        let config = trace_configuration(p);
        p.issue_command(
            command_id,
            CommandKind::StartTrace(config),
            StatusAction::StartNativeTracking,
        );
        p.timeline_mut().set_streaming(true);
        p.services().set_bool(HAS_USED_MEMORY_CAPTURE, true);
        p.services().feature_tracker().track_record_allocations();
        true
    }

    pub fn stop_native_allocation_tracking(&mut self, p: &mut Profilers) -> bool {
        let command_id = p.next_command_id();
        if let Err(e) = self.native.request_stop(command_id) {
            warn!("{}", e);
            return false;
        }
        let config = trace_configuration(p);
        p.issue_command(
            command_id,
            CommandKind::StopTrace(config),
            StatusAction::StopNativeTracking,
        );
        true
    }

    pub fn toggle_native_allocation_tracking(&mut self, p: &mut Profilers) -> bool {
        if self.native.is_recording() {
            self.stop_native_allocation_tracking(p)
        } else {
            self.start_native_allocation_capture(p)
        }
    }

    /// Stops whichever recording is running.
    pub fn stop_memory_recording(&mut self, p: &mut Profilers) -> bool {
        if self.native.is_recording() {
            self.stop_native_allocation_tracking(p)
        } else if self.java.is_recording() {
            self.track_allocations(p, false)
        } else {
            false
        }
    }

    /// Asks the agent to switch the live allocation sampling mode. Only
    /// possible while the session is alive.
    pub fn request_live_allocation_sampling_mode_update(
        &mut self,
        p: &mut Profilers,
        mode: LiveAllocationSamplingMode,
    ) -> bool {
        if !p.session().is_alive() || !self.live_allocation {
            debug!("Not updating sampling mode to {:?}", mode);
            return false;
        }
        let command_id = p.next_command_id();
        let rate = AllocationSamplingRate {
            sampling_num_interval: mode.sampling_interval(),
        };
        p.issue_command(
            command_id,
            CommandKind::SetAllocSampling(rate),
            StatusAction::SetSamplingMode(mode),
        );
        true
    }

    /// Nanoseconds since legacy tracking started, or [`INVALID_START_TIME`].
    pub fn allocation_tracking_elapsed_time_ns(&self, p: &Profilers) -> i64 {
        match self.java.start_ns() {
            Some(start_ns) => elapsed_since(p, start_ns),
            None => INVALID_START_TIME,
        }
    }

    /// Routes a selected duration to the stage that inspects it. Open
    /// durations that cannot be selected are ignored; `None` clears the
    /// timeline selection.
    pub fn select_capture_duration(
        &mut self,
        p: &mut Profilers,
        duration: Option<CaptureDurationData>,
    ) -> bool {
        let Some(duration) = duration else {
            p.timeline_mut().clear_selection();
            return true;
        };
        if duration.is_open() && !duration.is_selectable() {
            debug!("Ignoring selection of an unfinished {:?} capture", duration.kind());
            return false;
        }
        let kind = duration.kind();
        p.services().feature_tracker().track_select_capture(kind);
        p.services().set_bool(HAS_USED_MEMORY_CAPTURE, true);

        let key = duration.entry.key();
        let (start_ns, end_ns) = (key.start_time_ns(), key.end_time_ns());
        match kind {
            CaptureKind::LiveAllocation if duration.is_open() => {
                p.set_stage(Stage::Allocation(Box::new(AllocationStage::attach_live(start_ns))));
            }
            CaptureKind::LiveAllocation => {
                p.set_stage(Stage::Allocation(Box::new(AllocationStage::make_static_stage(
                    start_ns, end_ns,
                ))));
            }
            CaptureKind::HeapDump
            | CaptureKind::LegacyAllocation
            | CaptureKind::NativeAllocationSample => {
                p.set_stage(Stage::Capture(Box::new(MemoryCaptureStage::new(duration))));
            }
        }
        true
    }

    fn handle_heap_dump_status(&mut self, command_id: i64, status: HeapDumpStatus) {
        match status.status {
            HeapDumpStatusCode::Success | HeapDumpStatusCode::InProgress => {
                match self.heap_dump.on_started(command_id, status.start_time_ns) {
                    Ok(true) => {
                        self.pending_capture_start_ns = status.start_time_ns;
                        self.options.set_recording();
                        self.aspects.changed(MemoryProfilerAspect::HeapDumpStarted);
                    }
                    Ok(false) => debug!("Repeated heap dump status for command {}", command_id),
                    Err(e) => warn!("{}", e),
                }
            }
            code => self.fail_request(
                RecordingKind::HeapDump,
                command_id,
                &format!("Heap dump failed: {code:?}"),
            ),
        }
    }

    fn handle_track_status(&mut self, command_id: i64, enable: bool, status: TrackStatus) {
        match status.status {
            TrackStatusCode::Success | TrackStatusCode::InProgress if enable => {
                match self.java.on_started(command_id, status.start_time_ns) {
                    Ok(true) => {
                        self.pending_legacy_allocation_start_ns = status.start_time_ns;
                        self.options.set_recording();
                    }
                    Ok(false) => debug!("Repeated tracking status for command {}", command_id),
                    Err(e) => debug!("{}", e),
                }
            }
            TrackStatusCode::Success | TrackStatusCode::InProgress => {
                match self.java.on_stopped(command_id) {
                    Ok(true) => {
                        self.pending_capture_start_ns = self.pending_legacy_allocation_start_ns;
                        self.pending_legacy_allocation_start_ns = INVALID_START_TIME;
                        self.options.set_finished();
                    }
                    Ok(false) => debug!("Repeated tracking status for command {}", command_id),
                    Err(e) => debug!("{}", e),
                }
            }
            TrackStatusCode::NotEnabled => self.fail_request(
                RecordingKind::JavaAllocations,
                command_id,
                "Allocation tracking is not enabled on the device",
            ),
            code => self.fail_request(
                RecordingKind::JavaAllocations,
                command_id,
                &format!("Allocation tracking request failed: {code:?}"),
            ),
        }
        self.aspects.changed(MemoryProfilerAspect::TrackingEnabled);
    }

    /// Fails the request `command_id` of `kind`. A failed stop leaves the
    /// recording and its option running.
    fn fail_request(&mut self, kind: RecordingKind, command_id: i64, reason: &str) {
        let tracker = match kind {
            RecordingKind::HeapDump => &mut self.heap_dump,
            RecordingKind::JavaAllocations => &mut self.java,
            RecordingKind::NativeAllocations => &mut self.native,
        };
        if !tracker.on_failed(command_id, reason) {
            return;
        }
        if tracker.is_recording() {
            self.options.set_stop_error(reason);
        } else {
            self.options.set_error(reason);
        }
    }

    fn handle_native_start(&mut self, command_id: i64, status: TraceStartStatus) {
        match status.status {
            TraceStartCode::Success => match self.native.on_started(command_id, status.start_time_ns) {
                Ok(true) => {
                    self.pending_capture_start_ns = status.start_time_ns;
                    self.options.set_recording();
                    self.aspects.changed(MemoryProfilerAspect::TrackingEnabled);
                }
                Ok(false) => debug!("Repeated trace start status for command {}", command_id),
                Err(e) => warn!("{}", e),
            },
            TraceStartCode::Failure | TraceStartCode::Unspecified => {
                let reason = if status.error_message.is_empty() {
                    format!(
                        "Native allocation recording failed to start (error code {})",
                        status.error_code
                    )
                } else {
                    format!(
                        "Native allocation recording failed to start: {}",
                        status.error_message
                    )
                };
                self.fail_request(RecordingKind::NativeAllocations, command_id, &reason);
            }
        }
    }

    fn handle_native_stop(&mut self, command_id: i64, status: TraceStopStatus) {
        match status.status {
            TraceStopCode::Success => match self.native.on_stopped(command_id) {
                Ok(true) => {
                    self.options.set_finished();
                    self.aspects.changed(MemoryProfilerAspect::TrackingEnabled);
                }
                Ok(false) => debug!("Repeated trace stop status for command {}", command_id),
                Err(e) => warn!("{}", e),
            },
            TraceStopCode::NoOngoingProfiling => {
                info!("No native allocation recording was running");
                self.native.finish();
                self.options.set_finished();
                self.aspects.changed(MemoryProfilerAspect::TrackingEnabled);
            }
            TraceStopCode::Failure | TraceStopCode::Unspecified => {
                let reason = format!(
                    "Native allocation recording failed to stop: {}",
                    status.error_message
                );
                self.fail_request(RecordingKind::NativeAllocations, command_id, &reason);
            }
        }
    }

    /// Looks up recordings that were already running when the stage opened.
    fn submit_restore(&self, p: &Profilers) {
        let legacy_series = (!self.live_allocation).then(|| self.allocation_series.clone());
        let query_native = p.device().feature_level >= FEATURE_LEVEL_Q;
        let client = p.client();
        let session = p.session().clone();
        let tx = self.tx.clone();
        p.submit(move || {
            let legacy_tracking_start_ns = legacy_series.and_then(|series| {
                series
                    .data_for_range(&Range::EVERYTHING)
                    .last()
                    .filter(|d| d.value.is_open())
                    .map(|d| d.value.entry.key().start_time_ns())
            });
            let native_start_ns = if query_native {
                ongoing_native_start(client.as_ref(), &session)
            } else {
                None
            };
            let _ = tx.send(StageMessage::Restored {
                legacy_tracking_start_ns,
                native_start_ns,
            });
        });
    }

    fn apply_restore(&mut self, legacy_tracking_start_ns: Option<i64>, native_start_ns: Option<i64>) {
        if let Some(start_ns) = legacy_tracking_start_ns {
            if !self.java.is_recording() && !self.java.is_requesting() {
                self.java.restore(start_ns);
                self.pending_legacy_allocation_start_ns = start_ns;
                self.options.set_recording();
                self.aspects.changed(MemoryProfilerAspect::TrackingEnabled);
            }
        }
        if let Some(start_ns) = native_start_ns {
            if !self.native.is_recording() && !self.native.is_requesting() {
                self.native.restore(start_ns);
                self.pending_capture_start_ns = start_ns;
                self.options.set_recording();
                self.aspects.changed(MemoryProfilerAspect::TrackingEnabled);
            }
        }
    }

    fn submit_refresh(&mut self, p: &Profilers) {
        if self.refresh_in_flight {
            return;
        }
        self.refresh_in_flight = true;
        let series = [
            self.heap_dump_series.clone(),
            self.allocation_series.clone(),
            self.native_series.clone(),
        ];
        let sampling = self.live_allocation.then(|| self.sampling_series.clone());
        let tx = self.tx.clone();
        p.submit(move || {
            let mut captures: Vec<_> = series
                .iter()
                .flat_map(|s| s.data_for_range(&Range::EVERYTHING))
                .collect();
            captures.sort_by_key(|d| d.x);
            let sampling_interval = sampling.and_then(|s| s.rate_at(i64::MAX));
            let _ = tx.send(StageMessage::Refreshed {
                captures,
                sampling_interval,
            });
        });
    }

    fn apply_refresh(
        &mut self,
        p: &mut Profilers,
        captures: Vec<SeriesData<CaptureDurationData>>,
        sampling_interval: Option<i32>,
    ) {
        let finished = |start_ns: i64, kind: Option<CaptureKind>| {
            captures.iter().map(|d| &d.value).find(|d| {
                d.entry.key().start_time_ns() == start_ns
                    && !d.is_open()
                    && kind.map_or(true, |k| d.kind() == k)
            })
        };

        if let Some(start_ns) = self.heap_dump.start_ns() {
            if finished(start_ns, Some(CaptureKind::HeapDump)).is_some() {
                self.heap_dump.finish();
                self.options.set_finished();
                self.aspects.changed(MemoryProfilerAspect::HeapDumpFinished);
            }
        }

        if self.select_latest && self.pending_capture_start_ns != INVALID_START_TIME {
            if let Some(latest) = finished(self.pending_capture_start_ns, None).cloned() {
                info!("Selecting latest capture at {}", self.pending_capture_start_ns);
                self.pending_capture_start_ns = INVALID_START_TIME;
                self.select_capture_duration(p, Some(latest));
            }
        }

        if self.live_allocation {
            if let Some(interval) = sampling_interval {
                let mode = LiveAllocationSamplingMode::from_interval(interval);
                if mode != self.sampling_mode {
                    info!("Live allocation sampling mode is now {:?}", mode);
                    self.sampling_mode = mode;
                    self.aspects
                        .changed(MemoryProfilerAspect::LiveAllocationSamplingMode);
                }
            }
        }

        self.captures = captures;
    }
}

impl StageController for MainMemoryProfilerStage {
    fn enter(&mut self, p: &mut Profilers) {
        self.build_options(p);
        self.submit_restore(p);
    }

    fn exit(&mut self, _p: &mut Profilers) {
        self.select_latest = false;
    }

    fn update(&mut self, p: &mut Profilers) {
        while let Ok(message) = self.rx.try_recv() {
            match message {
                StageMessage::Restored {
                    legacy_tracking_start_ns,
                    native_start_ns,
                } => self.apply_restore(legacy_tracking_start_ns, native_start_ns),
                StageMessage::Refreshed {
                    captures,
                    sampling_interval,
                } => {
                    self.refresh_in_flight = false;
                    self.apply_refresh(p, captures, sampling_interval);
                }
            }
        }

        if !p.session().is_alive() && self.native.start_ns().is_some() && !self.native.is_requesting() {
            info!("Session ended during native allocation recording, stopping it");
            self.stop_native_allocation_tracking(p);
        }

        self.submit_refresh(p);
    }

    fn on_status(&mut self, _p: &mut Profilers, status: MatchedStatus<StatusAction>) {
        let MatchedStatus {
            command_id,
            action,
            event,
        } = status;
        match (action, event.data) {
            (StatusAction::HeapDump, EventData::HeapDumpStatus(s)) => {
                self.handle_heap_dump_status(command_id, s)
            }
            (StatusAction::TrackAllocations { enable }, EventData::AllocTrackingStatus(s)) => {
                self.handle_track_status(command_id, enable, s)
            }
            (
                StatusAction::StartNativeTracking,
                EventData::TraceStatus(TraceStatusData { start: Some(s), .. }),
            ) => self.handle_native_start(command_id, s),
            (
                StatusAction::StopNativeTracking,
                EventData::TraceStatus(TraceStatusData { stop: Some(s), .. }),
            ) => self.handle_native_stop(command_id, s),
            (StatusAction::SetSamplingMode(mode), _) => {
                debug!("Sampling mode {:?} acknowledged", mode)
            }
            (action, data) => warn!("Unexpected {:?} status for {:?}", data.kind(), action),
        }
    }

    fn on_command_failed(
        &mut self,
        _p: &mut Profilers,
        command_id: i64,
        action: StatusAction,
        error: &str,
    ) {
        let kind = match action {
            StatusAction::HeapDump => RecordingKind::HeapDump,
            StatusAction::TrackAllocations { .. } => RecordingKind::JavaAllocations,
            StatusAction::StartNativeTracking | StatusAction::StopNativeTracking => {
                RecordingKind::NativeAllocations
            }
            StatusAction::SetSamplingMode(_) => return,
        };
        self.fail_request(kind, command_id, error);
    }
}

fn trace_configuration(p: &Profilers) -> TraceConfiguration {
    let app_name = p.process().name.clone();
    TraceConfiguration {
        temp_path: format!("/data/local/tmp/perfd/{app_name}.trace"),
        abi_cpu_arch: p.device().cpu_abi.clone(),
        sampling_interval_bytes: p.config().native_sampling_rate_bytes,
        app_name,
    }
}

/// Start of a native recording the agent reports as running, if any.
fn ongoing_native_start(client: &dyn TransportClient, session: &Session) -> Option<i64> {
    let query = EventQuery::new(session.stream_id, session.pid, EventKind::TraceStatus)
        .between(session.start_ns, i64::MAX);
    let events = match client.get_events(&query) {
        Ok(events) => events,
        Err(e) => {
            warn!("Failed to query trace status: {:#}", e);
            return None;
        }
    };
    match events.last().map(|e| &e.data) {
        Some(EventData::TraceStatus(TraceStatusData {
            start: Some(start), ..
        })) if start.status == TraceStartCode::Success => Some(start.start_time_ns),
        _ => None,
    }
}

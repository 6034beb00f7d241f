//! Host context: the session, the agent client and the active stage.
//!
//! Everything here runs on one owning thread. [`Profilers::update`] is the
//! tick: it applies messages from the dispatch workers, runs tasks queued for
//! the owning thread, resolves command statuses and lets the active stage
//! advance. Agent round trips never run inside a tick.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::capture::CaptureKind;
use crate::config::ProfilerConfig;
use crate::executor::{DispatchPool, Joiner, MainThreadQueue};
use crate::session::{Device, Process, Session, SupportLevel};
use crate::stage::{
    AllocationStage, MainMemoryProfilerStage, MemoryCaptureStage, Stage, StageType, StatusAction,
};
use crate::transport::{
    Command, CommandIdGenerator, CommandKind, Event, PendingCommands, TransportClient,
};
use crate::units::{ns_to_us, Range};

/// Preference recording that the user has taken at least one memory capture.
pub const HAS_USED_MEMORY_CAPTURE: &str = "memory.profiler.has.used.capture";

/// Upper bound on the ticks [`Profilers::settle`] runs.
const SETTLE_ROUNDS: usize = 10;

/// Fire-and-forget usage reporting.
pub trait FeatureTracker: Send + Sync {
    fn track_dump_heap(&self);
    fn track_record_allocations(&self);
    fn track_select_capture(&self, kind: CaptureKind);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopFeatureTracker;

impl FeatureTracker for NoopFeatureTracker {
    fn track_dump_heap(&self) {}
    fn track_record_allocations(&self) {}
    fn track_select_capture(&self, _kind: CaptureKind) {}
}

/// Services the host environment provides.
pub struct IdeServices {
    feature_tracker: Arc<dyn FeatureTracker>,
    preferences: DashMap<String, bool>,
}

impl IdeServices {
    pub fn new(feature_tracker: Arc<dyn FeatureTracker>) -> Self {
        Self {
            feature_tracker,
            preferences: DashMap::new(),
        }
    }

    pub fn feature_tracker(&self) -> &dyn FeatureTracker {
        self.feature_tracker.as_ref()
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.preferences.get(key).map_or(default, |v| *v)
    }

    pub fn set_bool(&self, key: &str, value: bool) {
        self.preferences.insert(key.to_string(), value);
    }
}

/// Streaming state, the user's selection and the span of data seen so far,
/// all in microseconds.
#[derive(Clone, Debug)]
pub struct Timeline {
    streaming: bool,
    selection: Range,
    data_range: Range,
}

impl Timeline {
    fn new(start_us: i64) -> Self {
        Self {
            streaming: false,
            selection: Range::empty(),
            data_range: Range::new(start_us, start_us),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    pub fn selection(&self) -> Range {
        self.selection
    }

    pub fn set_selection(&mut self, selection: Range) {
        self.selection = selection;
    }

    pub fn clear_selection(&mut self) {
        self.selection = Range::empty();
    }

    pub fn data_range(&self) -> Range {
        self.data_range
    }

    fn advance_to(&mut self, now_us: i64) {
        if now_us > self.data_range.max {
            self.data_range.max = now_us;
        }
    }
}

enum ProfilerMessage {
    CommandFailed { command_id: i64, error: String },
    Polled { statuses: Vec<(i64, Event)>, now_ns: Option<i64> },
}

pub struct Profilers {
    client: Arc<dyn TransportClient>,
    services: IdeServices,
    config: ProfilerConfig,
    session: Session,
    device: Device,
    process: Process,
    support_level: SupportLevel,
    dispatch: DispatchPool,
    queue: MainThreadQueue,
    command_ids: CommandIdGenerator,
    pending: PendingCommands<StatusAction>,
    tx: Sender<ProfilerMessage>,
    rx: Receiver<ProfilerMessage>,
    poll_in_flight: bool,
    timeline: Timeline,
    stage: Option<Stage>,
    next_stage: Option<Stage>,
    in_stage_call: bool,
}

impl Profilers {
    pub fn new(
        client: Arc<dyn TransportClient>,
        session: Session,
        device: Device,
        process: Process,
        config: ProfilerConfig,
    ) -> Self {
        let (tx, rx) = channel();
        Self {
            client,
            services: IdeServices::new(Arc::new(NoopFeatureTracker)),
            dispatch: DispatchPool::new(config.dispatch_threads),
            config,
            timeline: Timeline::new(ns_to_us(session.start_ns)),
            session,
            device,
            process,
            support_level: SupportLevel::default(),
            queue: MainThreadQueue::new(),
            command_ids: CommandIdGenerator::new(),
            pending: PendingCommands::new(),
            tx,
            rx,
            poll_in_flight: false,
            stage: None,
            next_stage: None,
            in_stage_call: false,
        }
    }

    pub fn with_support_level(mut self, support_level: SupportLevel) -> Self {
        self.support_level = support_level;
        self
    }

    pub fn with_feature_tracker(mut self, tracker: Arc<dyn FeatureTracker>) -> Self {
        self.services = IdeServices::new(tracker);
        self
    }

    /// Command ids start at `first` instead of 1.
    pub fn with_first_command_id(mut self, first: i64) -> Self {
        self.command_ids = CommandIdGenerator::starting_at(first);
        self
    }

    pub fn client(&self) -> Arc<dyn TransportClient> {
        self.client.clone()
    }

    pub fn services(&self) -> &IdeServices {
        &self.services
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn process(&self) -> &Process {
        &self.process
    }

    pub fn support_level(&self) -> SupportLevel {
        self.support_level
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn timeline_mut(&mut self) -> &mut Timeline {
        &mut self.timeline
    }

    /// The owning thread's joiner. Tasks run during [`Profilers::update`].
    pub fn joiner(&self) -> Arc<dyn Joiner> {
        Arc::new(self.queue.joiner())
    }

    /// Runs a blocking task on the dispatch pool.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        self.dispatch.submit(task);
    }

    pub fn has_pending_commands(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn next_command_id(&self) -> i64 {
        self.command_ids.next_id()
    }

    /// Registers `action` under `command_id`, then sends the command from a
    /// worker. A transport failure comes back as a failed command on a later
    /// tick.
    pub fn issue_command(&mut self, command_id: i64, kind: CommandKind, action: StatusAction) {
        let command = Command {
            command_id,
            stream_id: self.session.stream_id,
            pid: self.session.pid,
            session_id: self.session.session_id,
            kind,
        };
        self.pending.register(
            command_id,
            action.status_kind(),
            self.session.stream_id,
            self.session.pid,
            action,
        );
        debug!("Issuing {} as command {}", command.kind.name(), command_id);
        let client = self.client.clone();
        let tx = self.tx.clone();
        self.dispatch.submit(move || {
            if let Err(e) = client.execute(&command) {
                let _ = tx.send(ProfilerMessage::CommandFailed {
                    command_id,
                    error: format!("{e:#}"),
                });
            }
        });
    }

    /// Marks the session as ended at `end_ns`.
    pub fn end_session(&mut self, end_ns: i64) {
        info!("Session {} ended at {}", self.session.session_id, end_ns);
        self.session.end_ns = end_ns;
        self.timeline.set_streaming(false);
    }

    /// Enters the main memory stage.
    pub fn start(&mut self) {
        let main = MainMemoryProfilerStage::new(self);
        self.set_stage(Stage::Main(Box::new(main)));
    }

    /// Leaves the active stage and waits for in-flight round trips.
    pub fn stop(&mut self) {
        if let Some(mut stage) = self.stage.take() {
            self.in_stage_call = true;
            stage.controller_mut().exit(self);
            self.in_stage_call = false;
        }
        self.next_stage = None;
        self.dispatch.join();
    }

    /// Switches stages. Inside a stage callback the switch happens once the
    /// callback returns.
    pub fn set_stage(&mut self, stage: Stage) {
        self.next_stage = Some(stage);
        if !self.in_stage_call {
            self.apply_stage_switch();
        }
    }

    fn apply_stage_switch(&mut self) {
        while let Some(mut next) = self.next_stage.take() {
            self.in_stage_call = true;
            if let Some(mut previous) = self.stage.take() {
                debug!("Leaving {:?} stage", previous.stage_type());
                previous.controller_mut().exit(self);
            }
            info!("Entering {:?} stage", next.stage_type());
            next.controller_mut().enter(self);
            self.in_stage_call = false;
            self.stage = Some(next);
        }
    }

    pub fn stage(&self) -> Option<&Stage> {
        self.stage.as_ref()
    }

    pub fn stage_type(&self) -> Option<StageType> {
        self.stage.as_ref().map(Stage::stage_type)
    }

    /// Runs `f` against the active stage, then applies any stage switch it
    /// requested.
    pub fn with_stage<R>(&mut self, f: impl FnOnce(&mut Stage, &mut Profilers) -> R) -> Option<R> {
        let mut stage = self.stage.take()?;
        self.in_stage_call = true;
        let result = f(&mut stage, self);
        self.in_stage_call = false;
        self.stage = Some(stage);
        self.apply_stage_switch();
        Some(result)
    }

    pub fn main_stage<R>(
        &mut self,
        f: impl FnOnce(&mut MainMemoryProfilerStage, &mut Profilers) -> R,
    ) -> Option<R> {
        self.with_stage(|stage, p| match stage {
            Stage::Main(main) => Some(f(main, p)),
            _ => None,
        })
        .flatten()
    }

    pub fn capture_stage<R>(
        &mut self,
        f: impl FnOnce(&mut MemoryCaptureStage, &mut Profilers) -> R,
    ) -> Option<R> {
        self.with_stage(|stage, p| match stage {
            Stage::Capture(capture) => Some(f(capture, p)),
            _ => None,
        })
        .flatten()
    }

    pub fn allocation_stage<R>(
        &mut self,
        f: impl FnOnce(&mut AllocationStage, &mut Profilers) -> R,
    ) -> Option<R> {
        self.with_stage(|stage, p| match stage {
            Stage::Allocation(allocation) => Some(f(allocation, p)),
            _ => None,
        })
        .flatten()
    }

    /// One tick of the owning thread.
    pub fn update(&mut self) {
        self.drain_messages();
        self.queue.drain();
        self.submit_poll();
        self.with_stage(|stage, p| stage.controller_mut().update(p));
    }

    /// Ticks until in-flight work has had the chance to land. Blocks on the
    /// dispatch pool and on the active stage's capture load between ticks.
    pub fn settle(&mut self) {
        for _ in 0..SETTLE_ROUNDS {
            self.dispatch.join();
            if let Some(stage) = &self.stage {
                stage.controller().wait_for_load();
            }
            self.update();
        }
    }

    fn drain_messages(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            match message {
                ProfilerMessage::Polled { statuses, now_ns } => {
                    self.poll_in_flight = false;
                    if let Some(now_ns) = now_ns {
                        self.timeline.advance_to(ns_to_us(now_ns));
                    }
                    for (command_id, event) in statuses {
                        let Some(matched) = self.pending.resolve(command_id, event) else {
                            continue;
                        };
                        let handled = self.with_stage(|stage, p| {
                            stage.controller_mut().on_status(p, matched)
                        });
                        if handled.is_none() {
                            warn!("Status of command {} arrived with no stage", command_id);
                        }
                    }
                }
                ProfilerMessage::CommandFailed { command_id, error } => {
                    let Some(action) = self.pending.cancel(command_id) else {
                        continue;
                    };
                    error!("Command {} ({:?}) failed: {}", command_id, action, error);
                    self.with_stage(|stage, p| {
                        stage
                            .controller_mut()
                            .on_command_failed(p, command_id, action, &error)
                    });
                }
            }
        }
    }

    /// Starts a status poll on a worker unless one is still running.
    fn submit_poll(&mut self) {
        if self.poll_in_flight {
            return;
        }
        self.poll_in_flight = true;
        let queries = self.pending.queries();
        let client = self.client.clone();
        let tx = self.tx.clone();
        let stream_id = self.session.stream_id;
        self.dispatch.submit(move || {
            let mut statuses = Vec::new();
            for (command_id, query) in queries {
                match client.get_events(&query) {
                    Ok(events) => {
                        if let Some(event) = events.into_iter().next() {
                            statuses.push((command_id, event));
                        }
                    }
                    Err(e) => warn!("Failed to poll status of command {}: {:#}", command_id, e),
                }
            }
            let now_ns = match client.get_current_time(stream_id) {
                Ok(now_ns) => Some(now_ns),
                Err(e) => {
                    warn!("Failed to read agent time: {:#}", e);
                    None
                }
            };
            let _ = tx.send(ProfilerMessage::Polled { statuses, now_ns });
        });
    }
}

impl Drop for Profilers {
    fn drop(&mut self) {
        self.stop();
    }
}

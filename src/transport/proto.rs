//! Wire-level records exchanged with the on-device agent.
//!
//! These mirror what the agent sends and receives. They are plain data: every
//! type derives `Clone`, `PartialEq` and serde so an event log can be replayed
//! from JSON. All timestamps are nanoseconds in the agent's time base.

use serde::{Deserialize, Serialize};

use crate::units::OPEN_END;

fn open_end() -> i64 {
    OPEN_END
}

/// Kinds of events the agent publishes on a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MemoryUsage,
    MemoryAllocStats,
    MemoryGc,
    MemoryAllocSampling,
    MemoryHeapDump,
    MemoryHeapDumpStatus,
    MemoryAllocTracking,
    MemoryAllocTrackingStatus,
    MemoryNativeSample,
    MemoryAllocEvents,
    TraceStatus,
}

/// One event on the agent's stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub pid: i32,
    #[serde(default)]
    pub group_id: i64,
    #[serde(default)]
    pub command_id: i64,
    pub timestamp_ns: i64,
    #[serde(default)]
    pub is_ended: bool,
    pub data: EventData,
}

impl Event {
    pub fn new(pid: i32, timestamp_ns: i64, data: EventData) -> Self {
        Self {
            pid,
            group_id: 0,
            command_id: 0,
            timestamp_ns,
            is_ended: false,
            data,
        }
    }

    pub fn with_group(mut self, group_id: i64) -> Self {
        self.group_id = group_id;
        self
    }

    pub fn with_command(mut self, command_id: i64) -> Self {
        self.command_id = command_id;
        self
    }

    pub fn ended(mut self, is_ended: bool) -> Self {
        self.is_ended = is_ended;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventData {
    MemoryUsage(MemoryUsageData),
    AllocStats(AllocStatsData),
    Gc(GcData),
    AllocSampling(AllocationSamplingRate),
    HeapDump(HeapDumpInfo),
    HeapDumpStatus(HeapDumpStatus),
    AllocationsInfo(AllocationsInfo),
    AllocTrackingStatus(TrackStatus),
    NativeSample(NativeSampleData),
    Allocation(AllocationEvent),
    TraceStatus(TraceStatusData),
}

impl EventData {
    pub fn kind(&self) -> EventKind {
        match self {
            EventData::MemoryUsage(_) => EventKind::MemoryUsage,
            EventData::AllocStats(_) => EventKind::MemoryAllocStats,
            EventData::Gc(_) => EventKind::MemoryGc,
            EventData::AllocSampling(_) => EventKind::MemoryAllocSampling,
            EventData::HeapDump(_) => EventKind::MemoryHeapDump,
            EventData::HeapDumpStatus(_) => EventKind::MemoryHeapDumpStatus,
            EventData::AllocationsInfo(_) => EventKind::MemoryAllocTracking,
            EventData::AllocTrackingStatus(_) => EventKind::MemoryAllocTrackingStatus,
            EventData::NativeSample(_) => EventKind::MemoryNativeSample,
            EventData::Allocation(_) => EventKind::MemoryAllocEvents,
            EventData::TraceStatus(_) => EventKind::TraceStatus,
        }
    }
}

/// Memory usage breakdown in bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryUsageData {
    pub java_mem: i64,
    pub native_mem: i64,
    pub graphics_mem: i64,
    pub stack_mem: i64,
    pub code_mem: i64,
    pub others_mem: i64,
    pub total_mem: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocStatsData {
    pub java_allocation_count: i64,
    pub java_free_count: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcData {
    pub duration_ns: i64,
}

/// 0 disables tracking, 1 records every allocation, N records one in N.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSamplingRate {
    pub sampling_num_interval: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeapDumpInfo {
    pub start_time_ns: i64,
    #[serde(default = "open_end")]
    pub end_time_ns: i64,
    #[serde(default = "default_true")]
    pub success: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeapDumpStatusCode {
    #[default]
    Unspecified,
    Success,
    InProgress,
    NotProfiling,
    FailureUnknown,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapDumpStatus {
    pub status: HeapDumpStatusCode,
    #[serde(default)]
    pub start_time_ns: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocationsInfo {
    pub start_time_ns: i64,
    #[serde(default = "open_end")]
    pub end_time_ns: i64,
    #[serde(default)]
    pub legacy: bool,
    #[serde(default = "default_true")]
    pub success: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatusCode {
    #[default]
    Unspecified,
    Success,
    InProgress,
    NotEnabled,
    NotProfiling,
    FailureUnknown,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackStatus {
    pub status: TrackStatusCode,
    #[serde(default)]
    pub start_time_ns: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeSampleData {
    pub start_time_ns: i64,
    #[serde(default = "open_end")]
    pub end_time_ns: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationAction {
    Alloc,
    Free,
}

/// One allocation or free reported while live tracking is on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocationEvent {
    pub action: AllocationAction,
    pub instance_id: u64,
    pub class_name: String,
    #[serde(default)]
    pub heap: String,
    #[serde(default)]
    pub size: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStartCode {
    #[default]
    Unspecified,
    Success,
    Failure,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStartStatus {
    pub status: TraceStartCode,
    #[serde(default)]
    pub start_time_ns: i64,
    #[serde(default)]
    pub error_code: i32,
    #[serde(default)]
    pub error_message: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStopCode {
    #[default]
    Unspecified,
    Success,
    NoOngoingProfiling,
    Failure,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStopStatus {
    pub status: TraceStopCode,
    #[serde(default)]
    pub error_message: String,
}

/// A trace status event carries either a start or a stop status.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceStatusData {
    pub start: Option<TraceStartStatus>,
    pub stop: Option<TraceStopStatus>,
}

/// Perfetto-style configuration for a native heap recording.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceConfiguration {
    pub app_name: String,
    pub abi_cpu_arch: String,
    #[serde(default)]
    pub temp_path: String,
    #[serde(default)]
    pub sampling_interval_bytes: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandKind {
    HeapDump,
    StartAllocTracking,
    StopAllocTracking,
    StartTrace(TraceConfiguration),
    StopTrace(TraceConfiguration),
    SetAllocSampling(AllocationSamplingRate),
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::HeapDump => "HEAP_DUMP",
            CommandKind::StartAllocTracking => "START_ALLOC_TRACKING",
            CommandKind::StopAllocTracking => "STOP_ALLOC_TRACKING",
            CommandKind::StartTrace(_) => "START_TRACE",
            CommandKind::StopTrace(_) => "STOP_TRACE",
            CommandKind::SetAllocSampling(_) => "MEMORY_ALLOC_SAMPLING",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub command_id: i64,
    pub stream_id: i64,
    pub pid: i32,
    pub session_id: i64,
    pub kind: CommandKind,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecuteResponse {
    pub command_id: i64,
}

/// Answer to a payload fetch. Large dumps are written asynchronously on the
/// device, so the agent may report `NotReady` several times first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BytesResponse {
    NotReady,
    Success(Vec<u8>),
    NotFound,
    FailureUnknown,
}

/// Filter for [`super::TransportClient::get_events`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventQuery {
    pub stream_id: i64,
    pub pid: i32,
    pub kind: EventKind,
    pub from_ns: i64,
    pub to_ns: i64,
    pub command_id: Option<i64>,
}

impl EventQuery {
    pub fn new(stream_id: i64, pid: i32, kind: EventKind) -> Self {
        Self {
            stream_id,
            pid,
            kind,
            from_ns: i64::MIN,
            to_ns: i64::MAX,
            command_id: None,
        }
    }

    pub fn between(mut self, from_ns: i64, to_ns: i64) -> Self {
        self.from_ns = from_ns;
        self.to_ns = to_ns;
        self
    }

    pub fn for_command(mut self, command_id: i64) -> Self {
        self.command_id = Some(command_id);
        self
    }

    pub fn matches(&self, stream_id: i64, event: &Event) -> bool {
        stream_id == self.stream_id
            && event.pid == self.pid
            && event.kind() == self.kind
            && self.command_id.map_or(true, |id| id == event.command_id)
    }
}

/// All events sharing a group id, in timestamp order.
#[derive(Clone, Debug, PartialEq)]
pub struct EventGroup {
    pub group_id: i64,
    pub events: Vec<Event>,
}

impl EventGroup {
    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }
}

//! An in-process agent.
//!
//! `InMemoryTransport` stores event streams and payloads in memory and reacts to
//! commands the way the on-device agent does: each command produces a status
//! event tagged with its command id, and successful starts/stops open and close
//! the matching capture groups. It backs the test suite and the CLI's replay
//! mode.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::proto::*;
use super::{payload_id, TransportClient};
use crate::units::OPEN_END;

/// How the simulated agent answers commands.
#[derive(Clone, Debug)]
pub struct AgentBehavior {
    pub heap_dump_status: HeapDumpStatusCode,
    pub track_status: TrackStatusCode,
    pub trace_start_status: TraceStartCode,
    pub trace_stop_status: TraceStopCode,
    /// Allocation recordings produce a legacy (pre-O) info with a payload.
    pub legacy_allocations: bool,
    /// Payload stored for a finished heap dump, if any.
    pub heap_dump_payload: Option<Vec<u8>>,
    /// Payload stored for a finished legacy allocation recording, if any.
    pub allocation_payload: Option<Vec<u8>>,
    /// Payload stored for a finished native recording, if any.
    pub native_payload: Option<Vec<u8>>,
    /// Number of `NotReady` answers before a stored payload becomes available.
    pub payload_not_ready_polls: usize,
    /// Commands are accepted but no status event is ever emitted.
    pub silent: bool,
    /// `execute` fails as if the connection dropped.
    pub fail_execute: bool,
}

impl Default for AgentBehavior {
    fn default() -> Self {
        Self {
            heap_dump_status: HeapDumpStatusCode::Success,
            track_status: TrackStatusCode::Success,
            trace_start_status: TraceStartCode::Success,
            trace_stop_status: TraceStopCode::Success,
            legacy_allocations: false,
            heap_dump_payload: None,
            allocation_payload: None,
            native_payload: None,
            payload_not_ready_polls: 0,
            silent: false,
            fail_execute: false,
        }
    }
}

struct Payload {
    not_ready_polls: usize,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct AgentState {
    time_ns: i64,
    streams: HashMap<i64, Vec<Event>>,
    payloads: HashMap<String, Payload>,
    executed: Vec<Command>,
    behavior: AgentBehavior,
}

/// Serializable snapshot of an agent's recorded state, used by replay files.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecordedStream {
    pub stream_id: i64,
    #[serde(default)]
    pub time_ns: i64,
    #[serde(default)]
    pub events: Vec<Event>,
    /// Payload id to UTF-8 payload text.
    #[serde(default)]
    pub payloads: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct InMemoryTransport {
    state: Mutex<AgentState>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_recording(recording: RecordedStream) -> Self {
        let transport = Self::new();
        transport.set_time_ns(recording.time_ns);
        for event in recording.events {
            transport.add_event(recording.stream_id, event);
        }
        for (id, text) in recording.payloads {
            transport.add_payload(&id, text.into_bytes(), 0);
        }
        transport
    }

    pub fn configure(&self, f: impl FnOnce(&mut AgentBehavior)) {
        f(&mut self.state.lock().unwrap().behavior);
    }

    pub fn time_ns(&self) -> i64 {
        self.state.lock().unwrap().time_ns
    }

    pub fn set_time_ns(&self, time_ns: i64) {
        self.state.lock().unwrap().time_ns = time_ns;
    }

    pub fn advance_ns(&self, delta_ns: i64) {
        let mut state = self.state.lock().unwrap();
        state.time_ns = state.time_ns.saturating_add(delta_ns);
    }

    pub fn add_event(&self, stream_id: i64, event: Event) {
        let mut state = self.state.lock().unwrap();
        let events = state.streams.entry(stream_id).or_default();
        events.push(event);
        // Stable: events with equal timestamps keep insertion order.
        events.sort_by_key(|e| e.timestamp_ns);
    }

    pub fn add_payload(&self, id: &str, bytes: Vec<u8>, not_ready_polls: usize) {
        self.state.lock().unwrap().payloads.insert(
            id.to_string(),
            Payload {
                not_ready_polls,
                bytes,
            },
        );
    }

    /// Commands received so far, in order.
    pub fn executed_commands(&self) -> Vec<Command> {
        self.state.lock().unwrap().executed.clone()
    }

    fn respond(state: &mut AgentState, command: &Command) {
        let now = state.time_ns;
        let pid = command.pid;
        let stream = command.stream_id;
        let id = command.command_id;
        let mut emitted: Vec<Event> = Vec::new();

        match &command.kind {
            CommandKind::HeapDump => {
                let status = state.behavior.heap_dump_status;
                emitted.push(
                    Event::new(
                        pid,
                        now,
                        EventData::HeapDumpStatus(HeapDumpStatus {
                            status,
                            start_time_ns: now,
                        }),
                    )
                    .with_command(id),
                );
                if status == HeapDumpStatusCode::Success {
                    emitted.push(
                        Event::new(
                            pid,
                            now,
                            EventData::HeapDump(HeapDumpInfo {
                                start_time_ns: now,
                                end_time_ns: now,
                                success: true,
                            }),
                        )
                        .with_group(now)
                        .ended(true),
                    );
                    if let Some(bytes) = state.behavior.heap_dump_payload.clone() {
                        let polls = state.behavior.payload_not_ready_polls;
                        state.payloads.insert(
                            payload_id(now),
                            Payload {
                                not_ready_polls: polls,
                                bytes,
                            },
                        );
                    }
                }
            }
            CommandKind::StartAllocTracking => {
                let status = state.behavior.track_status;
                emitted.push(
                    Event::new(
                        pid,
                        now,
                        EventData::AllocTrackingStatus(TrackStatus {
                            status,
                            start_time_ns: now,
                        }),
                    )
                    .with_command(id),
                );
                if status == TrackStatusCode::Success {
                    emitted.push(
                        Event::new(
                            pid,
                            now,
                            EventData::AllocationsInfo(AllocationsInfo {
                                start_time_ns: now,
                                end_time_ns: OPEN_END,
                                legacy: state.behavior.legacy_allocations,
                                success: true,
                            }),
                        )
                        .with_group(now),
                    );
                }
            }
            CommandKind::StopAllocTracking => {
                let status = state.behavior.track_status;
                let open = Self::open_group(state, stream, pid, EventKind::MemoryAllocTracking);
                let start = open.unwrap_or(now);
                emitted.push(
                    Event::new(
                        pid,
                        now,
                        EventData::AllocTrackingStatus(TrackStatus {
                            status,
                            start_time_ns: start,
                        }),
                    )
                    .with_command(id),
                );
                if status == TrackStatusCode::Success && open.is_some() {
                    emitted.push(
                        Event::new(
                            pid,
                            now,
                            EventData::AllocationsInfo(AllocationsInfo {
                                start_time_ns: start,
                                end_time_ns: now,
                                legacy: state.behavior.legacy_allocations,
                                success: true,
                            }),
                        )
                        .with_group(start)
                        .ended(true),
                    );
                    if let Some(bytes) = state.behavior.allocation_payload.clone() {
                        state.payloads.insert(
                            payload_id(start),
                            Payload {
                                not_ready_polls: 0,
                                bytes,
                            },
                        );
                    }
                }
            }
            CommandKind::StartTrace(_) => {
                let status = state.behavior.trace_start_status;
                emitted.push(
                    Event::new(
                        pid,
                        now,
                        EventData::TraceStatus(TraceStatusData {
                            start: Some(TraceStartStatus {
                                status,
                                start_time_ns: now,
                                error_code: if status == TraceStartCode::Failure { 1 } else { 0 },
                                error_message: String::new(),
                            }),
                            stop: None,
                        }),
                    )
                    .with_command(id)
                    .with_group(now),
                );
                if status == TraceStartCode::Success {
                    emitted.push(
                        Event::new(
                            pid,
                            now,
                            EventData::NativeSample(NativeSampleData {
                                start_time_ns: now,
                                end_time_ns: OPEN_END,
                            }),
                        )
                        .with_group(now),
                    );
                }
            }
            CommandKind::StopTrace(_) => {
                let status = state.behavior.trace_stop_status;
                let open = Self::open_group(state, stream, pid, EventKind::MemoryNativeSample);
                let status = if open.is_none() && status == TraceStopCode::Success {
                    TraceStopCode::NoOngoingProfiling
                } else {
                    status
                };
                emitted.push(
                    Event::new(
                        pid,
                        now,
                        EventData::TraceStatus(TraceStatusData {
                            start: None,
                            stop: Some(TraceStopStatus {
                                status,
                                error_message: if status == TraceStopCode::Failure {
                                    "trace stop failed".to_string()
                                } else {
                                    String::new()
                                },
                            }),
                        }),
                    )
                    .with_command(id),
                );
                if let (TraceStopCode::Success, Some(start)) = (status, open) {
                    emitted.push(
                        Event::new(
                            pid,
                            now,
                            EventData::NativeSample(NativeSampleData {
                                start_time_ns: start,
                                end_time_ns: now,
                            }),
                        )
                        .with_group(start)
                        .ended(true),
                    );
                    if let Some(bytes) = state.behavior.native_payload.clone() {
                        state.payloads.insert(
                            payload_id(start),
                            Payload {
                                not_ready_polls: 0,
                                bytes,
                            },
                        );
                    }
                }
            }
            CommandKind::SetAllocSampling(rate) => {
                emitted.push(
                    Event::new(pid, now, EventData::AllocSampling(rate.clone())).with_command(id),
                );
            }
        }

        let events = state.streams.entry(stream).or_default();
        events.extend(emitted);
        events.sort_by_key(|e| e.timestamp_ns);
    }

    /// Group id of the last still-open group of `kind`, if any.
    fn open_group(state: &AgentState, stream: i64, pid: i32, kind: EventKind) -> Option<i64> {
        let events = state.streams.get(&stream)?;
        let mut groups: BTreeMap<i64, bool> = BTreeMap::new();
        for event in events.iter().filter(|e| e.pid == pid && e.kind() == kind) {
            let ended = groups.entry(event.group_id).or_insert(false);
            *ended |= event.is_ended;
        }
        groups
            .into_iter()
            .filter(|(_, ended)| !ended)
            .map(|(group, _)| group)
            .next_back()
    }
}

impl TransportClient for InMemoryTransport {
    fn get_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let state = self.state.lock().unwrap();
        let Some(events) = state.streams.get(&query.stream_id) else {
            return Ok(Vec::new());
        };
        Ok(events
            .iter()
            .filter(|e| query.matches(query.stream_id, e))
            .filter(|e| e.timestamp_ns >= query.from_ns && e.timestamp_ns <= query.to_ns)
            .cloned()
            .collect())
    }

    fn get_event_groups(&self, query: &EventQuery) -> Result<Vec<EventGroup>> {
        let state = self.state.lock().unwrap();
        let Some(events) = state.streams.get(&query.stream_id) else {
            return Ok(Vec::new());
        };
        let mut groups: BTreeMap<i64, Vec<Event>> = BTreeMap::new();
        for event in events.iter().filter(|e| query.matches(query.stream_id, e)) {
            groups.entry(event.group_id).or_default().push(event.clone());
        }
        Ok(groups
            .into_iter()
            .filter(|(_, events)| {
                let first = events.first().map_or(i64::MAX, |e| e.timestamp_ns);
                let last = events.last();
                let ended = last.is_some_and(|e| e.is_ended);
                let end = if ended {
                    last.map_or(i64::MAX, |e| e.timestamp_ns)
                } else {
                    i64::MAX
                };
                first <= query.to_ns && end >= query.from_ns
            })
            .map(|(group_id, events)| EventGroup { group_id, events })
            .collect())
    }

    fn execute(&self, command: &Command) -> Result<ExecuteResponse> {
        let mut state = self.state.lock().unwrap();
        if state.behavior.fail_execute {
            bail!("transport unavailable: {} rejected", command.kind.name());
        }
        state.executed.push(command.clone());
        if !state.behavior.silent {
            Self::respond(&mut state, command);
        }
        Ok(ExecuteResponse {
            command_id: command.command_id,
        })
    }

    fn get_current_time(&self, _stream_id: i64) -> Result<i64> {
        Ok(self.time_ns())
    }

    fn get_bytes(&self, _stream_id: i64, id: &str) -> Result<BytesResponse> {
        let mut state = self.state.lock().unwrap();
        let Some(payload) = state.payloads.get_mut(id) else {
            return Ok(BytesResponse::NotFound);
        };
        if payload.not_ready_polls > 0 {
            payload.not_ready_polls -= 1;
            return Ok(BytesResponse::NotReady);
        }
        Ok(BytesResponse::Success(payload.bytes.clone()))
    }
}

//! Per-kind recording state: Idle → Requesting → Recording → Idle, with a
//! Failed detour when the agent rejects a request.

use std::fmt;

use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordingKind {
    HeapDump,
    JavaAllocations,
    NativeAllocations,
}

impl fmt::Display for RecordingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordingKind::HeapDump => "heap dump",
            RecordingKind::JavaAllocations => "Java/Kotlin allocation recording",
            RecordingKind::NativeAllocations => "native allocation recording",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingOp {
    Start,
    Stop,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    /// A command was sent and its status event has not arrived yet.
    Requesting { command_id: i64, op: RecordingOp },
    Recording { start_ns: i64 },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// A start was requested while a request or recording is active.
    Busy { kind: RecordingKind, state: RecordingState },
    /// A stop was requested while nothing is recording.
    NotRecording { kind: RecordingKind },
    /// A status arrived for a command this tracker is not waiting on.
    UnexpectedStatus { kind: RecordingKind, command_id: i64 },
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionError::Busy { kind, state } => {
                write!(f, "cannot start {kind} while {state:?}")
            }
            TransitionError::NotRecording { kind } => {
                write!(f, "cannot stop {kind}: not recording")
            }
            TransitionError::UnexpectedStatus { kind, command_id } => {
                write!(f, "unexpected {kind} status for command {command_id}")
            }
        }
    }
}

impl std::error::Error for TransitionError {}

/// State of one recording kind.
#[derive(Debug)]
pub struct RecordingTracker {
    kind: RecordingKind,
    state: RecordingState,
    /// Start of the active recording, kept while its stop is in flight.
    started_at: Option<i64>,
    last_error: Option<String>,
}

impl RecordingTracker {
    pub fn new(kind: RecordingKind) -> Self {
        Self {
            kind,
            state: RecordingState::Idle,
            started_at: None,
            last_error: None,
        }
    }

    pub fn kind(&self) -> RecordingKind {
        self.kind
    }

    pub fn state(&self) -> &RecordingState {
        &self.state
    }

    pub fn is_recording(&self) -> bool {
        matches!(
            self.state,
            RecordingState::Recording { .. }
                | RecordingState::Requesting {
                    op: RecordingOp::Stop,
                    ..
                }
        )
    }

    pub fn is_requesting(&self) -> bool {
        matches!(self.state, RecordingState::Requesting { .. })
    }

    /// Start of the current recording, if one is active.
    pub fn start_ns(&self) -> Option<i64> {
        match self.state {
            RecordingState::Recording { start_ns } => Some(start_ns),
            RecordingState::Requesting {
                op: RecordingOp::Stop,
                ..
            } => self.started_at,
            _ => None,
        }
    }

    pub fn request_start(&mut self, command_id: i64) -> Result<(), TransitionError> {
        match self.state {
            RecordingState::Idle | RecordingState::Failed { .. } => {
                debug!("Requesting start of {} (command {})", self.kind, command_id);
                self.state = RecordingState::Requesting {
                    command_id,
                    op: RecordingOp::Start,
                };
                Ok(())
            }
            _ => Err(TransitionError::Busy {
                kind: self.kind,
                state: self.state.clone(),
            }),
        }
    }

    pub fn request_stop(&mut self, command_id: i64) -> Result<(), TransitionError> {
        match self.state {
            RecordingState::Recording { start_ns } => {
                debug!("Requesting stop of {} (command {})", self.kind, command_id);
                self.started_at = Some(start_ns);
                self.state = RecordingState::Requesting {
                    command_id,
                    op: RecordingOp::Stop,
                };
                Ok(())
            }
            _ => Err(TransitionError::NotRecording { kind: self.kind }),
        }
    }

    /// Applies a successful start status. Returns `Ok(false)` for a repeated
    /// status of a recording that is already running.
    pub fn on_started(&mut self, command_id: i64, start_ns: i64) -> Result<bool, TransitionError> {
        match self.state {
            RecordingState::Requesting {
                command_id: expected,
                op: RecordingOp::Start,
            } if expected == command_id => {
                info!("{} started at {}", self.kind, start_ns);
                self.state = RecordingState::Recording { start_ns };
                self.started_at = Some(start_ns);
                Ok(true)
            }
            RecordingState::Recording { .. } => Ok(false),
            _ => Err(TransitionError::UnexpectedStatus {
                kind: self.kind,
                command_id,
            }),
        }
    }

    /// Applies a successful stop status. Returns `Ok(false)` if nothing was
    /// being recorded.
    pub fn on_stopped(&mut self, command_id: i64) -> Result<bool, TransitionError> {
        match self.state {
            RecordingState::Requesting {
                command_id: expected,
                op: RecordingOp::Stop,
            } if expected == command_id => {
                info!("{} stopped", self.kind);
                self.state = RecordingState::Idle;
                self.started_at = None;
                Ok(true)
            }
            RecordingState::Idle => Ok(false),
            _ => Err(TransitionError::UnexpectedStatus {
                kind: self.kind,
                command_id,
            }),
        }
    }

    /// Fails the request `command_id` if it is the one in flight. A failed
    /// start ends in [`RecordingState::Failed`]; a failed stop leaves the
    /// recording running.
    pub fn on_failed(&mut self, command_id: i64, reason: impl Into<String>) -> bool {
        match self.state {
            RecordingState::Requesting {
                command_id: expected,
                op,
            } if expected == command_id => {
                let reason = reason.into();
                warn!("{} failed: {}", self.kind, reason);
                match (op, self.started_at) {
                    (RecordingOp::Stop, Some(start_ns)) => {
                        self.state = RecordingState::Recording { start_ns };
                    }
                    _ => {
                        self.state = RecordingState::Failed {
                            reason: reason.clone(),
                        };
                        self.started_at = None;
                    }
                }
                self.last_error = Some(reason);
                true
            }
            _ => false,
        }
    }

    /// Reason of the latest failed request, kept across later transitions.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Adopts a recording that was already running on the agent.
    pub fn restore(&mut self, start_ns: i64) {
        info!("Restoring {} started at {}", self.kind, start_ns);
        self.state = RecordingState::Recording { start_ns };
        self.started_at = Some(start_ns);
    }

    /// Ends a recording that completes on its own (heap dumps) or whose stop
    /// was acknowledged elsewhere.
    pub fn finish(&mut self) {
        if self.is_recording() {
            debug!("{} finished", self.kind);
        }
        self.state = RecordingState::Idle;
        self.started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_stop_cycle() {
        let mut tracker = RecordingTracker::new(RecordingKind::NativeAllocations);
        tracker.request_start(7).unwrap();
        assert!(tracker.is_requesting());
        assert!(!tracker.is_recording());
        assert_eq!(tracker.on_started(7, 1_000), Ok(true));
        assert_eq!(tracker.start_ns(), Some(1_000));

        tracker.request_stop(8).unwrap();
        assert!(tracker.is_recording());
        assert_eq!(tracker.start_ns(), Some(1_000));
        assert_eq!(tracker.on_stopped(8), Ok(true));
        assert_eq!(tracker.state(), &RecordingState::Idle);
    }

    #[test]
    fn test_duplicate_start_is_ignored() {
        let mut tracker = RecordingTracker::new(RecordingKind::JavaAllocations);
        tracker.request_start(3).unwrap();
        assert_eq!(tracker.on_started(3, 50), Ok(true));
        assert_eq!(tracker.on_started(3, 99), Ok(false));
        assert_eq!(tracker.start_ns(), Some(50));
    }

    #[test]
    fn test_busy_and_not_recording() {
        let mut tracker = RecordingTracker::new(RecordingKind::HeapDump);
        assert_eq!(
            tracker.request_stop(1),
            Err(TransitionError::NotRecording {
                kind: RecordingKind::HeapDump
            })
        );
        tracker.request_start(1).unwrap();
        assert!(tracker.request_start(2).is_err());
        assert!(tracker.on_started(5, 0).is_err());
    }

    #[test]
    fn test_failure_allows_retry() {
        let mut tracker = RecordingTracker::new(RecordingKind::NativeAllocations);
        tracker.request_start(1).unwrap();
        assert!(!tracker.on_failed(2, "wrong command"));
        assert!(tracker.on_failed(1, "agent said no"));
        assert_eq!(
            tracker.state(),
            &RecordingState::Failed {
                reason: "agent said no".to_string()
            }
        );
        tracker.request_start(2).unwrap();
    }

    #[test]
    fn test_failed_stop_keeps_recording() {
        let mut tracker = RecordingTracker::new(RecordingKind::NativeAllocations);
        tracker.request_start(1).unwrap();
        tracker.on_started(1, 400).unwrap();
        tracker.request_stop(2).unwrap();
        assert!(tracker.on_failed(2, "stop rejected"));
        assert_eq!(tracker.state(), &RecordingState::Recording { start_ns: 400 });
        assert_eq!(tracker.start_ns(), Some(400));
        assert_eq!(tracker.last_error(), Some("stop rejected"));

        tracker.request_stop(3).unwrap();
        assert_eq!(tracker.on_stopped(3), Ok(true));
        assert_eq!(tracker.state(), &RecordingState::Idle);
    }
}

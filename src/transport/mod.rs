//! Request/response access to the on-device agent.
//!
//! Every call on [`TransportClient`] blocks until the agent answers, so stage
//! code issues them from worker threads (the dispatch pool or the capture
//! loader) rather than from the thread that owns stage state.

pub mod in_memory;
pub mod pending;
pub mod proto;

use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::Result;

pub use in_memory::{AgentBehavior, InMemoryTransport, RecordedStream};
pub use pending::{MatchedStatus, PendingCommands};
pub use proto::*;

/// Synchronous client for the agent's RPC surface.
pub trait TransportClient: Send + Sync {
    /// Events matching `query`, sorted by timestamp.
    fn get_events(&self, query: &EventQuery) -> Result<Vec<Event>>;

    /// Event groups of `query.kind` whose lifetime overlaps
    /// `[query.from_ns, query.to_ns]`. Groups that have not ended overlap
    /// everything after their first event.
    fn get_event_groups(&self, query: &EventQuery) -> Result<Vec<EventGroup>>;

    /// Hands a command to the agent. Completion is reported later as a status
    /// event carrying `command.command_id`.
    fn execute(&self, command: &Command) -> Result<ExecuteResponse>;

    /// The agent's current clock for a stream, in nanoseconds.
    fn get_current_time(&self, stream_id: i64) -> Result<i64>;

    /// Fetches a payload (heap dump, allocation buffer) by id.
    fn get_bytes(&self, stream_id: i64, id: &str) -> Result<BytesResponse>;
}

/// Hands out locally unique command ids.
#[derive(Debug)]
pub struct CommandIdGenerator {
    next: AtomicI64,
}

impl CommandIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }

    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for CommandIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Id under which the agent stores the payload of a capture started at
/// `start_time_ns`.
pub fn payload_id(start_time_ns: i64) -> String {
    start_time_ns.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_ids_are_unique() {
        let ids = CommandIdGenerator::starting_at(7);
        assert_eq!(ids.next_id(), 7);
        assert_eq!(ids.next_id(), 8);
    }
}

//! Correlation of issued commands with their status events.
//!
//! Every command the stages send is registered here under its command id
//! before it leaves for the agent. The dispatch loop runs
//! [`PendingCommands::queries`] on a worker and feeds matches back to
//! [`PendingCommands::resolve`] on the owning thread. The first event carrying
//! a registered id resolves the entry and removes it, so a command's
//! continuation runs at most once no matter how many events repeat the id.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::proto::{Event, EventKind, EventQuery};
use super::TransportClient;

struct PendingCommand<A> {
    kind: EventKind,
    stream_id: i64,
    pid: i32,
    action: A,
}

/// A resolved command: the continuation that was registered for it and the
/// status event that resolved it.
#[derive(Debug)]
pub struct MatchedStatus<A> {
    pub command_id: i64,
    pub action: A,
    pub event: Event,
}

pub struct PendingCommands<A> {
    entries: BTreeMap<i64, PendingCommand<A>>,
}

impl<A> PendingCommands<A> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Waits for the first `kind` event on `(stream_id, pid)` tagged with
    /// `command_id`. Registering the same id twice replaces the continuation.
    pub fn register(&mut self, command_id: i64, kind: EventKind, stream_id: i64, pid: i32, action: A) {
        debug!("Waiting for {:?} status of command {}", kind, command_id);
        self.entries.insert(
            command_id,
            PendingCommand {
                kind,
                stream_id,
                pid,
                action,
            },
        );
    }

    /// Drops a pending entry, returning its continuation.
    pub fn cancel(&mut self, command_id: i64) -> Option<A> {
        self.entries.remove(&command_id).map(|p| p.action)
    }

    pub fn is_pending(&self, command_id: i64) -> bool {
        self.entries.contains_key(&command_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One query per pending entry, keyed by command id. The dispatch loop runs
    /// these off the owning thread and hands matches back to
    /// [`PendingCommands::resolve`].
    pub fn queries(&self) -> Vec<(i64, EventQuery)> {
        self.entries
            .iter()
            .map(|(&command_id, pending)| {
                (
                    command_id,
                    EventQuery::new(pending.stream_id, pending.pid, pending.kind)
                        .for_command(command_id),
                )
            })
            .collect()
    }

    /// Resolves `command_id` with `event`. Returns `None` if the command is no
    /// longer pending, which is how repeated events are swallowed.
    pub fn resolve(&mut self, command_id: i64, event: Event) -> Option<MatchedStatus<A>> {
        let pending = self.entries.remove(&command_id)?;
        debug!("Command {} resolved by {:?} event", command_id, pending.kind);
        Some(MatchedStatus {
            command_id,
            action: pending.action,
            event,
        })
    }

    /// Queries and resolves every entry on the calling thread, in command id
    /// order. Transport errors leave the entry in place for the next poll.
    pub fn poll(&mut self, client: &dyn TransportClient) -> Vec<MatchedStatus<A>> {
        let mut arrived = Vec::new();
        for (command_id, query) in self.queries() {
            match client.get_events(&query) {
                Ok(events) => {
                    if let Some(event) = events.into_iter().next() {
                        arrived.push((command_id, event));
                    }
                }
                Err(e) => {
                    warn!("Failed to poll status of command {}: {:#}", command_id, e);
                }
            }
        }
        arrived
            .into_iter()
            .filter_map(|(command_id, event)| self.resolve(command_id, event))
            .collect()
    }
}

impl<A> Default for PendingCommands<A> {
    fn default() -> Self {
        Self::new()
    }
}

//! Range-queryable series over the agent's event streams.
//!
//! Every query is a fresh round trip; nothing is cached between calls. A query
//! for `[min, max]` returns samples inside `[min - 1s, max + 1s]` so charts can
//! interpolate across the visible edges.

pub mod capture;
pub mod duration;
pub mod memory;
pub mod sampling;

use tracing::warn;

pub use capture::CaptureDataSeries;
pub use duration::{
    AllocationSamplingRateDurationData, CaptureDurationData, CaptureEntry, CaptureKey,
    GcDurationData,
};
pub use memory::{AllocStat, AllocStatsDataSeries, GcStatsDataSeries, MemoryDataSeries, MemoryField};
pub use sampling::AllocationSamplingRateDataSeries;

use crate::session::Session;
use crate::transport::{Event, EventGroup, EventKind, EventQuery, TransportClient};
use crate::units::{Range, QUERY_BUFFER_US};

/// One sample: a microsecond timestamp and its value.
#[derive(Clone, Debug, PartialEq)]
pub struct SeriesData<T> {
    pub x: i64,
    pub value: T,
}

impl<T> SeriesData<T> {
    pub fn new(x: i64, value: T) -> Self {
        Self { x, value }
    }
}

pub trait DataSeries<T> {
    /// Samples for `range` plus the query buffer, ascending by `x`.
    fn data_for_range(&self, range: &Range) -> Vec<SeriesData<T>>;
}

/// The buffered query window for `range`, in wire nanoseconds.
pub(crate) fn buffered_ns(range: &Range) -> Range {
    range.expanded(QUERY_BUFFER_US).to_ns()
}

/// Events of `kind` in the buffered window. Transport failures are logged and
/// read as an empty window.
pub(crate) fn fetch_events(
    client: &dyn TransportClient,
    session: &Session,
    kind: EventKind,
    range: &Range,
) -> Vec<Event> {
    let window = buffered_ns(range);
    let query = EventQuery::new(session.stream_id, session.pid, kind).between(window.min, window.max);
    match client.get_events(&query) {
        Ok(events) => events,
        Err(e) => {
            warn!("Failed to query {:?} events: {:#}", kind, e);
            Vec::new()
        }
    }
}

pub(crate) fn fetch_groups(
    client: &dyn TransportClient,
    session: &Session,
    kind: EventKind,
    range: &Range,
) -> Vec<EventGroup> {
    let window = buffered_ns(range);
    let query = EventQuery::new(session.stream_id, session.pid, kind).between(window.min, window.max);
    match client.get_event_groups(&query) {
        Ok(groups) => groups,
        Err(e) => {
            warn!("Failed to query {:?} groups: {:#}", kind, e);
            Vec::new()
        }
    }
}

/// Keeps samples inside the buffered window and sorts them by timestamp.
pub(crate) fn clip_and_sort<T>(range: &Range, mut data: Vec<SeriesData<T>>) -> Vec<SeriesData<T>> {
    let window = range.expanded(QUERY_BUFFER_US);
    data.retain(|d| window.contains(d.x));
    data.sort_by_key(|d| d.x);
    data
}

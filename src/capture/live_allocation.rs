//! Live allocation tracking (O and later).
//!
//! Allocation and free events stream continuously while tracking is on; a
//! capture over `[min, max]` shows every instance allocated inside the window
//! plus instances allocated earlier and freed inside it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use super::model::{CaptureData, CaptureDataBuilder, InstanceObject, DEFAULT_HEAP_NAME};
use super::{CaptureKind, CaptureObject, LoadSlot};
use crate::executor::CancelToken;
use crate::session::Session;
use crate::transport::{AllocationAction, EventData, EventKind, EventQuery, TransportClient};
use crate::units::{Range, OPEN_END};

pub struct LiveAllocationCaptureObject {
    client: Arc<dyn TransportClient>,
    session: Session,
    start_ns: i64,
    end_ns: i64,
    slot: LoadSlot,
}

impl LiveAllocationCaptureObject {
    pub fn new(client: Arc<dyn TransportClient>, session: Session, start_ns: i64, end_ns: i64) -> Self {
        Self {
            client,
            session,
            start_ns,
            end_ns,
            slot: LoadSlot::new(),
        }
    }

    /// The window in ns: the query range clipped to the recording.
    fn window_ns(&self, range: Range) -> (i64, i64) {
        let range_ns = range.to_ns();
        (range_ns.min.max(self.start_ns), range_ns.max.min(self.end_ns))
    }
}

struct Tracked {
    class_name: String,
    heap: String,
    size: i64,
    alloc_ns: i64,
    free_ns: Option<i64>,
}

impl CaptureObject for LiveAllocationCaptureObject {
    fn name(&self) -> String {
        "Live Allocations".to_string()
    }

    fn kind(&self) -> CaptureKind {
        CaptureKind::LiveAllocation
    }

    fn start_time_ns(&self) -> i64 {
        self.start_ns
    }

    fn end_time_ns(&self) -> i64 {
        self.end_ns
    }

    fn slot(&self) -> &LoadSlot {
        &self.slot
    }

    fn materialize(&self, range: Range, cancel: &CancelToken) -> Result<CaptureData> {
        let (min_ns, max_ns) = self.window_ns(range);
        let query = EventQuery::new(
            self.session.stream_id,
            self.session.pid,
            EventKind::MemoryAllocEvents,
        )
        .between(self.session.start_ns, max_ns);
        let events = self
            .client
            .get_events(&query)
            .context("fetching allocation events")?;

        let mut live: HashMap<u64, Tracked> = HashMap::new();
        let mut order: Vec<u64> = Vec::new();
        for event in events {
            if cancel.is_cancelled() {
                anyhow::bail!("cancelled");
            }
            let EventData::Allocation(alloc) = event.data else {
                continue;
            };
            match alloc.action {
                AllocationAction::Alloc => {
                    if !live.contains_key(&alloc.instance_id) {
                        order.push(alloc.instance_id);
                    }
                    live.insert(
                        alloc.instance_id,
                        Tracked {
                            class_name: alloc.class_name,
                            heap: if alloc.heap.is_empty() {
                                DEFAULT_HEAP_NAME.to_string()
                            } else {
                                alloc.heap
                            },
                            size: alloc.size,
                            alloc_ns: event.timestamp_ns,
                            free_ns: None,
                        },
                    );
                }
                AllocationAction::Free => {
                    if let Some(tracked) = live.get_mut(&alloc.instance_id) {
                        tracked.free_ns = Some(event.timestamp_ns);
                    }
                }
            }
        }

        let mut heap_ids: BTreeMap<String, i32> = BTreeMap::new();
        let mut builder = CaptureDataBuilder::new();
        let mut kept = 0usize;
        for id in order {
            let Some(tracked) = live.remove(&id) else {
                continue;
            };
            let allocated_inside = tracked.alloc_ns >= min_ns && tracked.alloc_ns <= max_ns;
            let freed_inside = tracked
                .free_ns
                .is_some_and(|f| f >= min_ns && f <= max_ns);
            if !allocated_inside && !freed_inside {
                continue;
            }
            let next_id = heap_ids.len() as i32;
            let heap_id = *heap_ids.entry(tracked.heap.clone()).or_insert(next_id);
            let mut instance = InstanceObject::new(id, tracked.class_name, tracked.size);
            instance.heap_name = tracked.heap;
            instance.alloc_time_ns = Some(tracked.alloc_ns);
            instance.dealloc_time_ns = tracked.free_ns;
            builder.add_instance(heap_id, instance);
            kept += 1;
        }
        debug!(
            "Live allocation window [{}, {}] holds {} instances",
            min_ns,
            if max_ns == OPEN_END { -1 } else { max_ns },
            kept
        );
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{DirectJoiner, Joiner};
    use crate::transport::{AllocationEvent, Event, InMemoryTransport};

    fn alloc(ts: i64, id: u64, action: AllocationAction) -> Event {
        Event::new(
            10,
            ts,
            EventData::Allocation(AllocationEvent {
                action,
                instance_id: id,
                class_name: "a.Foo".to_string(),
                heap: "app".to_string(),
                size: 16,
            }),
        )
    }

    #[test]
    fn test_window_selection() {
        let agent = Arc::new(InMemoryTransport::new());
        agent.add_event(1, alloc(1_000, 1, AllocationAction::Alloc));
        agent.add_event(1, alloc(5_000, 2, AllocationAction::Alloc));
        agent.add_event(1, alloc(6_000, 1, AllocationAction::Free));
        agent.add_event(1, alloc(20_000, 3, AllocationAction::Alloc));

        let capture =
            LiveAllocationCaptureObject::new(agent, Session::new(1, 1, 10, 0), 0, OPEN_END);
        let joiner: Arc<dyn Joiner> = Arc::new(DirectJoiner);
        // [4us, 10us]
        assert!(capture.load(Range::new(4, 10), &joiner, &CancelToken::new()));
        let data = capture.data().unwrap();
        assert_eq!(data.instance_count(), 2);
        let freed = data.instance(1).unwrap();
        assert_eq!(freed.dealloc_time_ns, Some(6_000));
        assert!(data.instance(3).is_none());
    }
}

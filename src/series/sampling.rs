use std::sync::Arc;

use tracing::warn;

use super::{AllocationSamplingRateDurationData, DataSeries, SeriesData};
use crate::session::Session;
use crate::transport::{EventData, EventKind, EventQuery, TransportClient};
use crate::units::{duration_us, ns_to_us, Range, OPEN_END, QUERY_BUFFER_US};

/// Changes of the live allocation sampling rate. Each setting lasts until the
/// next change; the latest one is open-ended.
pub struct AllocationSamplingRateDataSeries {
    client: Arc<dyn TransportClient>,
    session: Session,
}

impl AllocationSamplingRateDataSeries {
    pub fn new(client: Arc<dyn TransportClient>, session: Session) -> Self {
        Self { client, session }
    }
}

impl DataSeries<AllocationSamplingRateDurationData> for AllocationSamplingRateDataSeries {
    fn data_for_range(&self, range: &Range) -> Vec<SeriesData<AllocationSamplingRateDurationData>> {
        // Every change up to the end of the window is needed to know the rate
        // that was in effect when the window starts.
        let upper = range.expanded(QUERY_BUFFER_US).to_ns().max;
        let query = EventQuery::new(
            self.session.stream_id,
            self.session.pid,
            EventKind::MemoryAllocSampling,
        )
        .between(i64::MIN, upper);
        let events = match self.client.get_events(&query) {
            Ok(events) => events,
            Err(e) => {
                warn!("Failed to query sampling rate changes: {:#}", e);
                return Vec::new();
            }
        };

        let changes: Vec<_> = events
            .into_iter()
            .filter_map(|event| match event.data {
                EventData::AllocSampling(rate) => Some((event.timestamp_ns, rate)),
                _ => None,
            })
            .collect();

        let window = range.expanded(QUERY_BUFFER_US);
        let mut data = Vec::new();
        for (index, (start_ns, rate)) in changes.iter().enumerate() {
            let end_ns = changes.get(index + 1).map_or(OPEN_END, |(next, _)| *next);
            let x = ns_to_us(*start_ns);
            let duration = duration_us(*start_ns, end_ns);
            if !window.intersects_interval(x, duration) {
                continue;
            }
            data.push(SeriesData::new(
                x,
                AllocationSamplingRateDurationData {
                    duration_us: duration,
                    previous_rate: index.checked_sub(1).map(|i| changes[i].1.clone()),
                    current_rate: rate.clone(),
                },
            ));
        }
        data.sort_by_key(|d| d.x);
        data
    }
}

impl AllocationSamplingRateDataSeries {
    /// The most recent rate at or before `at_us`.
    pub fn rate_at(&self, at_us: i64) -> Option<i32> {
        self.data_for_range(&Range::new(at_us, at_us))
            .into_iter()
            .filter(|d| d.x <= at_us)
            .last()
            .map(|d| d.value.current_rate.sampling_num_interval)
    }
}

use std::sync::Arc;

use super::{clip_and_sort, fetch_events, DataSeries, GcDurationData, SeriesData};
use crate::session::Session;
use crate::transport::{EventData, EventKind, MemoryUsageData, TransportClient};
use crate::units::{duration_us, ns_to_us, Range};

/// One component of the memory usage breakdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryField {
    Java,
    Native,
    Graphics,
    Stack,
    Code,
    Others,
    Total,
}

impl MemoryField {
    pub const ALL: [MemoryField; 7] = [
        MemoryField::Java,
        MemoryField::Native,
        MemoryField::Graphics,
        MemoryField::Stack,
        MemoryField::Code,
        MemoryField::Others,
        MemoryField::Total,
    ];

    pub fn read(&self, usage: &MemoryUsageData) -> i64 {
        match self {
            MemoryField::Java => usage.java_mem,
            MemoryField::Native => usage.native_mem,
            MemoryField::Graphics => usage.graphics_mem,
            MemoryField::Stack => usage.stack_mem,
            MemoryField::Code => usage.code_mem,
            MemoryField::Others => usage.others_mem,
            MemoryField::Total => usage.total_mem,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MemoryField::Java => "Java",
            MemoryField::Native => "Native",
            MemoryField::Graphics => "Graphics",
            MemoryField::Stack => "Stack",
            MemoryField::Code => "Code",
            MemoryField::Others => "Others",
            MemoryField::Total => "Total",
        }
    }
}

/// Memory usage in bytes for one [`MemoryField`].
pub struct MemoryDataSeries {
    client: Arc<dyn TransportClient>,
    session: Session,
    field: MemoryField,
}

impl MemoryDataSeries {
    pub fn new(client: Arc<dyn TransportClient>, session: Session, field: MemoryField) -> Self {
        Self {
            client,
            session,
            field,
        }
    }
}

impl DataSeries<i64> for MemoryDataSeries {
    fn data_for_range(&self, range: &Range) -> Vec<SeriesData<i64>> {
        let data = fetch_events(
            self.client.as_ref(),
            &self.session,
            EventKind::MemoryUsage,
            range,
        )
        .into_iter()
        .filter_map(|event| match &event.data {
            EventData::MemoryUsage(usage) => Some(SeriesData::new(
                ns_to_us(event.timestamp_ns),
                self.field.read(usage),
            )),
            _ => None,
        })
        .collect();
        clip_and_sort(range, data)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocStat {
    Allocated,
    Freed,
}

/// Running Java allocation or free counts.
pub struct AllocStatsDataSeries {
    client: Arc<dyn TransportClient>,
    session: Session,
    stat: AllocStat,
}

impl AllocStatsDataSeries {
    pub fn new(client: Arc<dyn TransportClient>, session: Session, stat: AllocStat) -> Self {
        Self {
            client,
            session,
            stat,
        }
    }
}

impl DataSeries<i64> for AllocStatsDataSeries {
    fn data_for_range(&self, range: &Range) -> Vec<SeriesData<i64>> {
        let data = fetch_events(
            self.client.as_ref(),
            &self.session,
            EventKind::MemoryAllocStats,
            range,
        )
        .into_iter()
        .filter_map(|event| match &event.data {
            EventData::AllocStats(stats) => {
                let value = match self.stat {
                    AllocStat::Allocated => stats.java_allocation_count,
                    AllocStat::Freed => stats.java_free_count,
                };
                Some(SeriesData::new(ns_to_us(event.timestamp_ns), value))
            }
            _ => None,
        })
        .collect();
        clip_and_sort(range, data)
    }
}

/// Garbage collection pauses.
pub struct GcStatsDataSeries {
    client: Arc<dyn TransportClient>,
    session: Session,
}

impl GcStatsDataSeries {
    pub fn new(client: Arc<dyn TransportClient>, session: Session) -> Self {
        Self { client, session }
    }
}

impl DataSeries<GcDurationData> for GcStatsDataSeries {
    fn data_for_range(&self, range: &Range) -> Vec<SeriesData<GcDurationData>> {
        let data = fetch_events(self.client.as_ref(), &self.session, EventKind::MemoryGc, range)
            .into_iter()
            .filter_map(|event| match &event.data {
                EventData::Gc(gc) => Some(SeriesData::new(
                    ns_to_us(event.timestamp_ns),
                    GcDurationData {
                        duration_us: duration_us(
                            event.timestamp_ns,
                            event.timestamp_ns.saturating_add(gc.duration_ns),
                        ),
                    },
                )),
                _ => None,
            })
            .collect();
        clip_and_sort(range, data)
    }
}

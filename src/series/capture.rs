//! Timeline series of capture durations, one constructor per capture kind.

use std::sync::Arc;
use std::time::Duration;

use super::{fetch_groups, CaptureDurationData, CaptureEntry, CaptureKey, DataSeries, SeriesData};
use crate::capture::heap_dump::HprofLoadPolicy;
use crate::capture::{
    HeapDumpCaptureObject, LegacyAllocationCaptureObject, LiveAllocationCaptureObject,
    NativeAllocationSampleCaptureObject, SharedCapture,
};
use crate::session::Session;
use crate::transport::{EventData, EventKind, TransportClient};
use crate::units::{duration_us, ns_to_us, Range};

#[derive(Clone, Debug)]
enum CaptureSource {
    HeapDump(HprofLoadPolicy),
    LiveAllocation,
    LegacyAllocation(Duration),
    NativeSample(Duration),
}

impl CaptureSource {
    fn event_kind(&self) -> EventKind {
        match self {
            CaptureSource::HeapDump(_) => EventKind::MemoryHeapDump,
            CaptureSource::LiveAllocation | CaptureSource::LegacyAllocation(_) => {
                EventKind::MemoryAllocTracking
            }
            CaptureSource::NativeSample(_) => EventKind::MemoryNativeSample,
        }
    }
}

/// Durations of one capture kind. Each duration carries a [`CaptureEntry`]
/// whose factory builds the matching capture object on demand.
pub struct CaptureDataSeries {
    client: Arc<dyn TransportClient>,
    session: Session,
    source: CaptureSource,
}

impl CaptureDataSeries {
    pub fn of_heap_dump_samples(
        client: Arc<dyn TransportClient>,
        session: Session,
        policy: HprofLoadPolicy,
    ) -> Self {
        Self {
            client,
            session,
            source: CaptureSource::HeapDump(policy),
        }
    }

    /// Live (O and later) allocation recordings.
    pub fn of_allocation_infos(client: Arc<dyn TransportClient>, session: Session) -> Self {
        Self {
            client,
            session,
            source: CaptureSource::LiveAllocation,
        }
    }

    pub fn of_legacy_allocation_infos(
        client: Arc<dyn TransportClient>,
        session: Session,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            session,
            source: CaptureSource::LegacyAllocation(poll_interval),
        }
    }

    pub fn of_native_allocation_samples(
        client: Arc<dyn TransportClient>,
        session: Session,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            session,
            source: CaptureSource::NativeSample(poll_interval),
        }
    }

    /// Builds the entry for the latest record of a group, or `None` when the
    /// record does not belong to this series.
    fn entry_for(&self, data: &EventData) -> Option<(CaptureKey, bool, CaptureEntry)> {
        let client = self.client.clone();
        let session = self.session.clone();
        match (&self.source, data) {
            (CaptureSource::HeapDump(policy), EventData::HeapDump(info)) => {
                let key = CaptureKey::HeapDump(info.clone());
                let (info, policy) = (info.clone(), policy.clone());
                let entry = CaptureEntry::new(key.clone(), move || -> SharedCapture {
                    Arc::new(HeapDumpCaptureObject::new(
                        client.clone(),
                        session.clone(),
                        info.clone(),
                        policy.clone(),
                    ))
                });
                Some((key, false, entry))
            }
            (CaptureSource::LiveAllocation, EventData::AllocationsInfo(info)) if !info.legacy => {
                let key = CaptureKey::Allocations(info.clone());
                let (start, end) = (info.start_time_ns, info.end_time_ns);
                let entry = CaptureEntry::new(key.clone(), move || -> SharedCapture {
                    Arc::new(LiveAllocationCaptureObject::new(
                        client.clone(),
                        session.clone(),
                        start,
                        end,
                    ))
                });
                Some((key, true, entry))
            }
            (CaptureSource::LegacyAllocation(interval), EventData::AllocationsInfo(info))
                if info.legacy =>
            {
                let key = CaptureKey::Allocations(info.clone());
                let (info, interval) = (info.clone(), *interval);
                let entry = CaptureEntry::new(key.clone(), move || -> SharedCapture {
                    Arc::new(LegacyAllocationCaptureObject::new(
                        client.clone(),
                        session.clone(),
                        info.clone(),
                        interval,
                    ))
                });
                Some((key, false, entry))
            }
            (CaptureSource::NativeSample(interval), EventData::NativeSample(sample)) => {
                let key = CaptureKey::NativeSample(sample.clone());
                let (sample, interval) = (sample.clone(), *interval);
                let entry = CaptureEntry::new(key.clone(), move || -> SharedCapture {
                    Arc::new(NativeAllocationSampleCaptureObject::new(
                        client.clone(),
                        session.clone(),
                        sample.clone(),
                        interval,
                    ))
                });
                Some((key, false, entry))
            }
            _ => None,
        }
    }
}

impl DataSeries<CaptureDurationData> for CaptureDataSeries {
    fn data_for_range(&self, range: &Range) -> Vec<SeriesData<CaptureDurationData>> {
        let groups = fetch_groups(
            self.client.as_ref(),
            &self.session,
            self.source.event_kind(),
            range,
        );
        let mut data: Vec<_> = groups
            .iter()
            .filter_map(|group| group.last())
            .filter_map(|event| self.entry_for(&event.data))
            .map(|(key, selectable_when_open, entry)| {
                let start = key.start_time_ns();
                SeriesData::new(
                    ns_to_us(start),
                    CaptureDurationData::new(
                        duration_us(start, key.end_time_ns()),
                        selectable_when_open,
                        entry,
                    ),
                )
            })
            .collect();
        data.sort_by_key(|d| d.x);
        data
    }
}

//! Interval records shown on the timeline.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use crate::capture::{CaptureKind, SharedCapture};
use crate::transport::{AllocationSamplingRate, AllocationsInfo, HeapDumpInfo, NativeSampleData};
use crate::units::OPEN_END;

/// The wire record a capture was announced with. Two entries built from equal
/// records refer to the same capture.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CaptureKey {
    HeapDump(HeapDumpInfo),
    Allocations(AllocationsInfo),
    NativeSample(NativeSampleData),
}

impl CaptureKey {
    pub fn kind(&self) -> CaptureKind {
        match self {
            CaptureKey::HeapDump(_) => CaptureKind::HeapDump,
            CaptureKey::Allocations(info) if info.legacy => CaptureKind::LegacyAllocation,
            CaptureKey::Allocations(_) => CaptureKind::LiveAllocation,
            CaptureKey::NativeSample(_) => CaptureKind::NativeAllocationSample,
        }
    }

    pub fn start_time_ns(&self) -> i64 {
        match self {
            CaptureKey::HeapDump(info) => info.start_time_ns,
            CaptureKey::Allocations(info) => info.start_time_ns,
            CaptureKey::NativeSample(data) => data.start_time_ns,
        }
    }

    pub fn end_time_ns(&self) -> i64 {
        match self {
            CaptureKey::HeapDump(info) => info.end_time_ns,
            CaptureKey::Allocations(info) => info.end_time_ns,
            CaptureKey::NativeSample(data) => data.end_time_ns,
        }
    }
}

type Factory = Box<dyn Fn() -> SharedCapture + Send + Sync>;

struct EntryInner {
    key: CaptureKey,
    factory: Factory,
    object: Mutex<Option<SharedCapture>>,
}

/// Identity key plus a deferred factory for the capture it names.
///
/// The factory runs on the first [`CaptureEntry::capture_object`] call and
/// again only once the memoized object has been disposed. Clones share the
/// memoized object. Equality and hashing only look at the key.
#[derive(Clone)]
pub struct CaptureEntry {
    inner: Arc<EntryInner>,
}

impl CaptureEntry {
    pub fn new(key: CaptureKey, factory: impl Fn() -> SharedCapture + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(EntryInner {
                key,
                factory: Box::new(factory),
                object: Mutex::new(None),
            }),
        }
    }

    pub fn key(&self) -> &CaptureKey {
        &self.inner.key
    }

    pub fn capture_object(&self) -> SharedCapture {
        let mut object = self.inner.object.lock().unwrap();
        match &*object {
            Some(capture) if !capture.is_disposed() => capture.clone(),
            _ => {
                let capture = (self.inner.factory)();
                *object = Some(capture.clone());
                capture
            }
        }
    }

    /// Whether the factory has run for this entry.
    pub fn is_materialized(&self) -> bool {
        self.inner.object.lock().unwrap().is_some()
    }
}

impl PartialEq for CaptureEntry {
    fn eq(&self, other: &Self) -> bool {
        self.inner.key == other.inner.key
    }
}

impl Eq for CaptureEntry {}

impl Hash for CaptureEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.key.hash(state);
    }
}

impl fmt::Debug for CaptureEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureEntry")
            .field("key", &self.inner.key)
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

/// A capture's interval on the timeline. The start lives in the enclosing
/// [`super::SeriesData::x`].
#[derive(Clone, Debug)]
pub struct CaptureDurationData {
    pub duration_us: i64,
    /// Open intervals are normally not selectable; live allocation recordings
    /// are.
    pub selectable_when_open: bool,
    pub entry: CaptureEntry,
}

impl CaptureDurationData {
    pub fn new(duration_us: i64, selectable_when_open: bool, entry: CaptureEntry) -> Self {
        Self {
            duration_us,
            selectable_when_open,
            entry,
        }
    }

    pub fn kind(&self) -> CaptureKind {
        self.entry.key().kind()
    }

    pub fn is_open(&self) -> bool {
        self.duration_us == OPEN_END
    }

    pub fn is_selectable(&self) -> bool {
        !self.is_open() || self.selectable_when_open
    }
}

impl PartialEq for CaptureDurationData {
    fn eq(&self, other: &Self) -> bool {
        self.entry == other.entry
    }
}

impl Eq for CaptureDurationData {}

impl Hash for CaptureDurationData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entry.hash(state);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GcDurationData {
    pub duration_us: i64,
}

/// A sampling-rate setting, lasting until the next change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationSamplingRateDurationData {
    pub duration_us: i64,
    pub previous_rate: Option<AllocationSamplingRate>,
    pub current_rate: AllocationSamplingRate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::model::CaptureData;
    use crate::capture::{CaptureObject, LoadSlot};
    use crate::executor::CancelToken;
    use crate::units::Range;
    use anyhow::Result;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Empty(LoadSlot);

    impl CaptureObject for Empty {
        fn name(&self) -> String {
            "empty".to_string()
        }
        fn kind(&self) -> CaptureKind {
            CaptureKind::HeapDump
        }
        fn start_time_ns(&self) -> i64 {
            0
        }
        fn end_time_ns(&self) -> i64 {
            0
        }
        fn slot(&self) -> &LoadSlot {
            &self.0
        }
        fn materialize(&self, _range: Range, _cancel: &CancelToken) -> Result<CaptureData> {
            Ok(CaptureData::default())
        }
    }

    fn info() -> HeapDumpInfo {
        HeapDumpInfo {
            start_time_ns: 1_000,
            end_time_ns: 2_000,
            success: true,
        }
    }

    fn counting_entry(calls: &Arc<AtomicUsize>) -> CaptureEntry {
        let calls = calls.clone();
        CaptureEntry::new(CaptureKey::HeapDump(info()), move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Arc::new(Empty(LoadSlot::new()))
        })
    }

    #[test]
    fn test_equality_without_factory() {
        let calls = Arc::new(AtomicUsize::new(0));
        let a = CaptureDurationData::new(1, false, counting_entry(&calls));
        let b = CaptureDurationData::new(1, false, counting_entry(&calls));
        assert_eq!(a, b);
        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_factory_memoized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let entry = counting_entry(&calls);
        let copy = entry.clone();
        let first = entry.capture_object();
        let second = copy.capture_object();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        first.dispose();
        let third = entry.capture_object();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_open_selectability() {
        let calls = Arc::new(AtomicUsize::new(0));
        let open = CaptureDurationData::new(OPEN_END, false, counting_entry(&calls));
        assert!(open.is_open());
        assert!(!open.is_selectable());
        let live = CaptureDurationData::new(OPEN_END, true, counting_entry(&calls));
        assert!(live.is_selectable());
    }

    #[test]
    fn test_key_kind() {
        let live = CaptureKey::Allocations(AllocationsInfo {
            start_time_ns: 0,
            end_time_ns: OPEN_END,
            legacy: false,
            success: true,
        });
        assert_eq!(live.kind(), CaptureKind::LiveAllocation);
        assert!(!live.kind().opens_capture_stage());
    }
}

//! Capture objects: the heavyweight, lazily loaded contents of one heap dump or
//! allocation recording.
//!
//! A capture is constructed cheaply by its [`crate::series::CaptureEntry`]
//! factory, loaded exactly once by the [`crate::loader::CaptureObjectLoader`] on
//! a worker thread, queried from the owning thread, and finally disposed by the
//! selection that owns it. Disposal is safe at any point of that lifecycle.

pub mod budget;
pub mod heap_dump;
pub mod legacy_allocation;
pub mod live_allocation;
pub mod model;
pub mod native_sample;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

pub use budget::{can_safely_load_hprof, MemoryFigures};
pub use heap_dump::HeapDumpCaptureObject;
pub use legacy_allocation::LegacyAllocationCaptureObject;
pub use live_allocation::LiveAllocationCaptureObject;
pub use model::{CaptureData, ClassSet, FieldObject, FieldValue, HeapSet, InstanceObject};
pub use native_sample::NativeAllocationSampleCaptureObject;

use crate::executor::{CancelToken, Joiner};
use crate::transport::{BytesResponse, TransportClient};
use crate::units::Range;

pub type SharedCapture = Arc<dyn CaptureObject>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CaptureKind {
    HeapDump,
    LegacyAllocation,
    NativeAllocationSample,
    LiveAllocation,
}

impl CaptureKind {
    /// Kinds that are inspected in the dedicated capture stage.
    pub fn opens_capture_stage(&self) -> bool {
        matches!(
            self,
            CaptureKind::HeapDump | CaptureKind::NativeAllocationSample | CaptureKind::LegacyAllocation
        )
    }
}

#[derive(Debug, Default)]
enum LoadStatus {
    #[default]
    Unloaded,
    Loaded(Arc<CaptureData>),
    Failed,
    Disposed,
}

/// Loaded contents shared by every capture implementation.
#[derive(Debug, Default)]
pub struct LoadSlot {
    status: Mutex<LoadStatus>,
}

impl LoadSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> Option<Arc<CaptureData>> {
        match &*self.status.lock().unwrap() {
            LoadStatus::Loaded(data) => Some(data.clone()),
            _ => None,
        }
    }

    /// Stores a load outcome unless the capture was disposed meanwhile.
    fn finish(&self, outcome: Option<CaptureData>) -> bool {
        let mut status = self.status.lock().unwrap();
        if matches!(*status, LoadStatus::Disposed) {
            return false;
        }
        match outcome {
            Some(data) => {
                *status = LoadStatus::Loaded(Arc::new(data));
                true
            }
            None => {
                *status = LoadStatus::Failed;
                false
            }
        }
    }
}

/// The contents of one capture.
///
/// Implementors provide identity and [`CaptureObject::materialize`]; the loaded
/// state, error flag and disposal come from the shared [`LoadSlot`].
pub trait CaptureObject: Send + Sync {
    fn name(&self) -> String;

    fn kind(&self) -> CaptureKind;

    fn start_time_ns(&self) -> i64;

    fn end_time_ns(&self) -> i64;

    fn slot(&self) -> &LoadSlot;

    /// Fetches and parses the payload. Blocking; runs on the loader's worker.
    fn materialize(&self, range: Range, cancel: &CancelToken) -> Result<CaptureData>;

    /// Loads the capture, returning whether it is now queryable. Failures are
    /// logged and leave the capture in the error state. `joiner` is the owning
    /// thread's context for any follow-up notification.
    fn load(&self, range: Range, _joiner: &Arc<dyn Joiner>, cancel: &CancelToken) -> bool {
        let name = self.name();
        debug!("Loading capture {}", name);
        let outcome = match self.materialize(range, cancel) {
            Ok(data) => Some(data),
            Err(e) => {
                if cancel.is_cancelled() {
                    debug!("Load of {} cancelled: {:#}", name, e);
                } else {
                    warn!("Failed to load capture {}: {:#}", name, e);
                }
                None
            }
        };
        let loaded = self.slot().finish(outcome);
        if loaded {
            info!("Capture {} loaded", name);
        }
        loaded
    }

    fn is_done_loading(&self) -> bool {
        !matches!(*self.slot().status.lock().unwrap(), LoadStatus::Unloaded)
    }

    fn is_error(&self) -> bool {
        matches!(*self.slot().status.lock().unwrap(), LoadStatus::Failed)
    }

    fn is_disposed(&self) -> bool {
        matches!(*self.slot().status.lock().unwrap(), LoadStatus::Disposed)
    }

    /// Loaded contents, `None` until a load succeeded or after disposal.
    fn data(&self) -> Option<Arc<CaptureData>> {
        self.slot().data()
    }

    fn heap_sets(&self) -> Vec<Arc<HeapSet>> {
        self.data().map(|d| d.heaps.clone()).unwrap_or_default()
    }

    /// Drops the loaded payload. Safe to call before, during and after load.
    fn dispose(&self) {
        let mut status = self.slot().status.lock().unwrap();
        if !matches!(*status, LoadStatus::Disposed) {
            debug!("Disposing capture {}", self.name());
            *status = LoadStatus::Disposed;
        }
    }
}

/// Fetches a payload, sleeping `interval` between `NotReady` answers.
///
/// Returns `None` if the payload is missing, the agent fails, or `cancel`
/// interrupts the wait.
pub fn poll_payload(
    client: &dyn TransportClient,
    stream_id: i64,
    id: &str,
    cancel: &CancelToken,
    interval: Duration,
) -> Option<Vec<u8>> {
    loop {
        if cancel.is_cancelled() {
            debug!("Payload {} poll interrupted", id);
            return None;
        }
        match client.get_bytes(stream_id, id) {
            Ok(BytesResponse::Success(bytes)) => return Some(bytes),
            Ok(BytesResponse::NotReady) => {
                if !cancel.sleep(interval) {
                    debug!("Payload {} poll interrupted", id);
                    return None;
                }
            }
            Ok(BytesResponse::NotFound) => {
                warn!("Payload {} not found on stream {}", id, stream_id);
                return None;
            }
            Ok(BytesResponse::FailureUnknown) => {
                warn!("Agent failed to produce payload {}", id);
                return None;
            }
            Err(e) => {
                warn!("Failed to fetch payload {}: {:#}", id, e);
                return None;
            }
        }
    }
}

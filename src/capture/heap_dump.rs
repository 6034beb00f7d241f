//! Heap dump captures.
//!
//! The agent writes the dump asynchronously, so the payload is polled until it
//! stops answering `NotReady`. Before parsing, the dump size is checked against
//! the host's requestable memory.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;

use super::budget::{can_safely_load_hprof, MemoryFigures, DEFAULT_HPROF_SAFE_FACTOR, HPROF_LEEWAY_BYTES};
use super::model::{CaptureData, HeapSnapshot};
use super::{poll_payload, CaptureKind, CaptureObject, LoadSlot};
use crate::executor::CancelToken;
use crate::session::Session;
use crate::transport::{payload_id, HeapDumpInfo, TransportClient};
use crate::units::Range;

/// Limits applied when loading a heap dump.
#[derive(Clone, Debug)]
pub struct HprofLoadPolicy {
    pub safe_factor: u64,
    pub leeway_bytes: u64,
    pub poll_interval: Duration,
    /// Fixed memory figures; `None` reads the host's figures at load time.
    pub figures: Option<MemoryFigures>,
}

impl Default for HprofLoadPolicy {
    fn default() -> Self {
        Self {
            safe_factor: DEFAULT_HPROF_SAFE_FACTOR,
            leeway_bytes: HPROF_LEEWAY_BYTES,
            poll_interval: Duration::from_millis(50),
            figures: None,
        }
    }
}

impl HprofLoadPolicy {
    pub fn can_load(&self, file_size: u64) -> bool {
        let figures = self.figures.unwrap_or_else(MemoryFigures::current);
        can_safely_load_hprof(file_size, &figures, self.safe_factor, self.leeway_bytes)
    }
}

pub struct HeapDumpCaptureObject {
    client: Arc<dyn TransportClient>,
    session: Session,
    info: HeapDumpInfo,
    policy: HprofLoadPolicy,
    slot: LoadSlot,
}

impl HeapDumpCaptureObject {
    pub fn new(
        client: Arc<dyn TransportClient>,
        session: Session,
        info: HeapDumpInfo,
        policy: HprofLoadPolicy,
    ) -> Self {
        Self {
            client,
            session,
            info,
            policy,
            slot: LoadSlot::new(),
        }
    }

    pub fn info(&self) -> &HeapDumpInfo {
        &self.info
    }
}

impl CaptureObject for HeapDumpCaptureObject {
    fn name(&self) -> String {
        format!("Heap Dump @{}", self.info.start_time_ns)
    }

    fn kind(&self) -> CaptureKind {
        CaptureKind::HeapDump
    }

    fn start_time_ns(&self) -> i64 {
        self.info.start_time_ns
    }

    fn end_time_ns(&self) -> i64 {
        self.info.end_time_ns
    }

    fn slot(&self) -> &LoadSlot {
        &self.slot
    }

    fn materialize(&self, _range: Range, cancel: &CancelToken) -> Result<CaptureData> {
        if !self.info.success {
            bail!("agent reported a failed heap dump");
        }
        let id = payload_id(self.info.start_time_ns);
        let Some(bytes) = poll_payload(
            self.client.as_ref(),
            self.session.stream_id,
            &id,
            cancel,
            self.policy.poll_interval,
        ) else {
            bail!("heap dump {} is unavailable", id);
        };
        if !self.policy.can_load(bytes.len() as u64) {
            bail!(
                "not enough memory to load a {} byte heap dump (safe factor {})",
                bytes.len(),
                self.policy.safe_factor
            );
        }
        let snapshot = HeapSnapshot::parse(&bytes).with_context(|| format!("parsing heap dump {id}"))?;
        info!(
            "Parsed heap dump {} with {} instances",
            id,
            snapshot.instances.len()
        );
        CaptureData::from_snapshot(snapshot)
    }
}

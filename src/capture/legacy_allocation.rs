//! Pre-O allocation recordings, delivered by the agent as one buffer when the
//! recording stops.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use super::model::{CaptureData, CaptureDataBuilder, InstanceObject, DEFAULT_HEAP_NAME};
use super::{poll_payload, CaptureKind, CaptureObject, LoadSlot};
use crate::executor::CancelToken;
use crate::session::Session;
use crate::transport::{payload_id, AllocationsInfo, TransportClient};
use crate::units::Range;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyAllocationRecord {
    pub class_name: String,
    pub size: i64,
    #[serde(default)]
    pub thread_id: i32,
    #[serde(default)]
    pub stack: Vec<String>,
}

pub struct LegacyAllocationCaptureObject {
    client: Arc<dyn TransportClient>,
    session: Session,
    info: AllocationsInfo,
    poll_interval: Duration,
    slot: LoadSlot,
}

impl LegacyAllocationCaptureObject {
    pub fn new(
        client: Arc<dyn TransportClient>,
        session: Session,
        info: AllocationsInfo,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            session,
            info,
            poll_interval,
            slot: LoadSlot::new(),
        }
    }
}

impl CaptureObject for LegacyAllocationCaptureObject {
    fn name(&self) -> String {
        format!("Allocations @{}", self.info.start_time_ns)
    }

    fn kind(&self) -> CaptureKind {
        CaptureKind::LegacyAllocation
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
            bail!("allocation recording did not complete");
        }
        let id = payload_id(self.info.start_time_ns);
        let Some(bytes) = poll_payload(
            self.client.as_ref(),
            self.session.stream_id,
            &id,
            cancel,
            self.poll_interval,
        ) else {
            bail!("allocation buffer {} is unavailable", id);
        };
        let records: Vec<LegacyAllocationRecord> =
            serde_json::from_slice(&bytes).with_context(|| format!("parsing allocations {id}"))?;

        let mut builder = CaptureDataBuilder::new();
        builder.declare_heap(0, DEFAULT_HEAP_NAME);
        for (index, record) in records.into_iter().enumerate() {
            let mut instance = InstanceObject::new(index as u64 + 1, record.class_name, record.size);
            instance.alloc_time_ns = Some(self.info.start_time_ns);
            builder.add_instance(0, instance);
        }
        Ok(builder.build())
    }
}

//! Native heap samples recorded through a heapprofd trace.
//!
//! The agent symbolizes the trace on the device and hands back one record per
//! allocation callsite. Each callsite becomes a class in the `native` heap.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use super::model::{CaptureData, CaptureDataBuilder, InstanceObject, NATIVE_HEAP_NAME};
use super::{poll_payload, CaptureKind, CaptureObject, LoadSlot};
use crate::executor::CancelToken;
use crate::session::Session;
use crate::transport::{payload_id, NativeSampleData, TransportClient};
use crate::units::Range;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeAllocationRecord {
    pub callsite: String,
    pub allocations: i64,
    pub size_bytes: i64,
}

pub struct NativeAllocationSampleCaptureObject {
    client: Arc<dyn TransportClient>,
    session: Session,
    data: NativeSampleData,
    poll_interval: Duration,
    slot: LoadSlot,
}

impl NativeAllocationSampleCaptureObject {
    pub fn new(
        client: Arc<dyn TransportClient>,
        session: Session,
        data: NativeSampleData,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            session,
            data,
            poll_interval,
            slot: LoadSlot::new(),
        }
    }
}

impl CaptureObject for NativeAllocationSampleCaptureObject {
    fn name(&self) -> String {
        format!("Native Sampled @{}", self.data.start_time_ns)
    }

    fn kind(&self) -> CaptureKind {
        CaptureKind::NativeAllocationSample
    }

    fn start_time_ns(&self) -> i64 {
        self.data.start_time_ns
    }

    fn end_time_ns(&self) -> i64 {
        self.data.end_time_ns
    }

    fn slot(&self) -> &LoadSlot {
        &self.slot
    }

    fn materialize(&self, _range: Range, cancel: &CancelToken) -> Result<CaptureData> {
        let id = payload_id(self.data.start_time_ns);
        let Some(bytes) = poll_payload(
            self.client.as_ref(),
            self.session.stream_id,
            &id,
            cancel,
            self.poll_interval,
        ) else {
            bail!("native trace {} is unavailable", id);
        };
        let records: Vec<NativeAllocationRecord> =
            serde_json::from_slice(&bytes).with_context(|| format!("parsing native trace {id}"))?;

        let mut builder = CaptureDataBuilder::new();
        builder.declare_heap(0, NATIVE_HEAP_NAME);
        for (index, record) in records.into_iter().enumerate() {
            let mut instance = InstanceObject::new(index as u64 + 1, record.callsite, 0);
            instance.heap_name = NATIVE_HEAP_NAME.to_string();
            instance.native_size = record.size_bytes;
            instance.retained_size = record.size_bytes;
            instance.array_length = u32::try_from(record.allocations).ok();
            builder.add_instance(0, instance);
        }
        Ok(builder.build())
    }
}

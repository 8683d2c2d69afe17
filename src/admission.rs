use crate::queue::QueueHandle;
use crate::record::{RawReading, Record, RecordError};
use crate::stats::IngestStats;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub const REASON_MALFORMED: &str = "malformed";
pub const REASON_MISSING_FIELDS: &str = "missing fields";
pub const REASON_INVALID_TIMESTAMP: &str = "invalid timestamp";
pub const REASON_INTERNAL: &str = "internal validation failure";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionResult {
    Accepted,
    RejectedInvalid(&'static str),
    /// The queue is full (or shutting down); the caller should retry later.
    RejectedBusy,
}

/// Validates inbound readings and hands them to the queue without waiting.
#[derive(Clone, Debug)]
pub struct AdmissionGate {
    queue: QueueHandle,
    stats: Arc<IngestStats>,
}

impl AdmissionGate {
    pub fn new(queue: QueueHandle, stats: Arc<IngestStats>) -> Self {
        Self { queue, stats }
    }

    /// Decodes one JSON reading and tries to enqueue it. Never blocks and
    /// never panics: a fault inside decoding is reported as invalid input.
    pub fn admit(&self, mut raw: Vec<u8>) -> AdmissionResult {
        let decoded = panic::catch_unwind(AssertUnwindSafe(|| decode(&mut raw)));
        let record = match decoded {
            Ok(Ok(record)) => record,
            Ok(Err(reason)) => return self.reject_invalid(reason),
            Err(_) => {
                tracing::error!("sensor reading validation panicked");
                return self.reject_invalid(REASON_INTERNAL);
            }
        };
        self.admit_record(record)
    }

    pub fn admit_record(&self, record: Record) -> AdmissionResult {
        match self.queue.try_enqueue(record) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(queue_depth = self.queue.len(), "queued sensor reading");
                AdmissionResult::Accepted
            }
            Err(err) => {
                self.stats.rejected_busy.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    error = %err,
                    queue_depth = self.queue.len(),
                    "rejecting sensor reading"
                );
                AdmissionResult::RejectedBusy
            }
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    fn reject_invalid(&self, reason: &'static str) -> AdmissionResult {
        self.stats.rejected_invalid.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(reason, "rejecting invalid sensor reading");
        AdmissionResult::RejectedInvalid(reason)
    }
}

fn decode(raw: &mut [u8]) -> Result<Record, &'static str> {
    let reading: RawReading = simd_json::serde::from_slice(raw).map_err(|_| REASON_MALFORMED)?;
    reading.into_record().map_err(|err| match err {
        RecordError::MissingFields => REASON_MISSING_FIELDS,
        RecordError::InvalidTimestamp(_) => REASON_INVALID_TIMESTAMP,
    })
}

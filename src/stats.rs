use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Pipeline counters. Admission and the batcher only ever write these; the
/// read-only endpoints take a [`StatsSnapshot`].
#[derive(Debug, Default)]
pub struct IngestStats {
    pub accepted: AtomicU64,
    pub rejected_invalid: AtomicU64,
    pub rejected_busy: AtomicU64,
    pub flushed_batches: AtomicU64,
    pub flushed_records: AtomicU64,
    pub failed_batches: AtomicU64,
    pub dropped_records: AtomicU64,
    pub last_flush_unix_ms: AtomicU64,
    pub last_batch_len: AtomicU64,
    pub average_flush_micros: AtomicU64,
    pub inflight_flushes: AtomicU64,
    pub last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub queue_depth: u64,
    pub queue_capacity: u64,
    pub accepted: u64,
    pub rejected_invalid: u64,
    pub rejected_busy: u64,
    pub flushed_batches: u64,
    pub flushed_records: u64,
    pub failed_batches: u64,
    pub dropped_records: u64,
    pub last_flush_unix_ms: u64,
    pub last_batch_len: u64,
    pub average_flush_ms: f64,
    pub inflight_flushes: u64,
    pub last_error: Option<String>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&self, err: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn clear_error(&self) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    pub fn record_flush(&self, len: usize, elapsed: Duration) {
        self.flushed_batches.fetch_add(1, Ordering::Relaxed);
        self.flushed_records.fetch_add(len as u64, Ordering::Relaxed);
        self.last_batch_len.store(len as u64, Ordering::Relaxed);
        let now = Utc::now().timestamp_millis().max(0) as u64;
        self.last_flush_unix_ms.store(now, Ordering::Relaxed);

        let micros = elapsed.as_micros() as u64;
        let prev = self.average_flush_micros.load(Ordering::Relaxed);
        let avg = if prev == 0 { micros } else { (prev + micros) / 2 };
        self.average_flush_micros.store(avg, Ordering::Relaxed);
        self.clear_error();
    }

    pub fn record_failed_flush(&self, len: usize, err: impl Into<String>) {
        self.failed_batches.fetch_add(1, Ordering::Relaxed);
        self.dropped_records.fetch_add(len as u64, Ordering::Relaxed);
        self.record_error(err);
    }

    pub fn snapshot(&self, queue_depth: usize, queue_capacity: usize) -> StatsSnapshot {
        StatsSnapshot {
            queue_depth: queue_depth as u64,
            queue_capacity: queue_capacity as u64,
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected_invalid: self.rejected_invalid.load(Ordering::Relaxed),
            rejected_busy: self.rejected_busy.load(Ordering::Relaxed),
            flushed_batches: self.flushed_batches.load(Ordering::Relaxed),
            flushed_records: self.flushed_records.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            dropped_records: self.dropped_records.load(Ordering::Relaxed),
            last_flush_unix_ms: self.last_flush_unix_ms.load(Ordering::Relaxed),
            last_batch_len: self.last_batch_len.load(Ordering::Relaxed),
            average_flush_ms: self.average_flush_micros.load(Ordering::Relaxed) as f64 / 1000.0,
            inflight_flushes: self.inflight_flushes.load(Ordering::Relaxed),
            last_error: self.last_error.lock().ok().and_then(|e| e.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_flush_is_cleared_by_next_success() {
        let stats = IngestStats::new();
        stats.record_failed_flush(3, "connection refused");
        let snap = stats.snapshot(0, 10);
        assert_eq!(snap.failed_batches, 1);
        assert_eq!(snap.dropped_records, 3);
        assert_eq!(snap.last_error.as_deref(), Some("connection refused"));

        stats.record_flush(2, Duration::from_micros(400));
        let snap = stats.snapshot(1, 10);
        assert_eq!(snap.flushed_batches, 1);
        assert_eq!(snap.flushed_records, 2);
        assert_eq!(snap.last_batch_len, 2);
        assert_eq!(snap.queue_depth, 1);
        assert!(snap.last_error.is_none());
        assert!((snap.average_flush_ms - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn average_flush_time_blends_with_previous() {
        let stats = IngestStats::new();
        stats.record_flush(1, Duration::from_micros(1000));
        stats.record_flush(1, Duration::from_micros(3000));
        assert_eq!(stats.average_flush_micros.load(Ordering::Relaxed), 2000);
    }
}

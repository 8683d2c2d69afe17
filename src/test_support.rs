use crate::record::{Priority, Record};
use crate::sink::{Sink, SinkError, StoreStats, StoreStatsSource};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Deterministic record: `n` picks the timestamp second and the value.
pub fn record(device_id: &str, n: u32) -> Record {
    let timestamp = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .unwrap()
        + chrono::Duration::seconds(i64::from(n));
    Record::new(
        timestamp,
        device_id,
        "temperature",
        f64::from(n) + 0.5,
        Priority::Medium,
        format!("payload-{n}"),
    )
    .unwrap()
}

pub fn reading_json(device_id: &str, metric_name: &str, timestamp: &str) -> Vec<u8> {
    serde_json::json!({
        "timestamp": timestamp,
        "device_id": device_id,
        "metric_name": metric_name,
        "value": 12.25,
        "priority": 1,
        "data": "xyz",
    })
    .to_string()
    .into_bytes()
}

/// In-memory sink that keeps every delivered batch.
#[derive(Debug, Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<Vec<Record>>>,
    attempts: AtomicUsize,
    fail_next: AtomicUsize,
    stall: AtomicBool,
    unhealthy: AtomicBool,
    closed: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn batches(&self) -> Vec<Vec<Record>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn records(&self) -> Vec<Record> {
        self.batches().into_iter().flatten().collect()
    }

    /// Number of `write_batch` calls, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Makes every following write hang forever.
    pub fn stall(&self) {
        self.stall.store(true, Ordering::SeqCst);
    }

    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.unhealthy.store(unhealthy, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn write_batch(&self, records: &[Record]) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SinkError::Unavailable("injected failure".to_string()));
        }
        self.batches.lock().unwrap().push(records.to_vec());
        Ok(())
    }

    async fn ping(&self) -> Result<(), SinkError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("ping refused".to_string()));
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreStatsSource for RecordingSink {
    async fn store_stats(&self) -> Result<StoreStats, SinkError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("stats refused".to_string()));
        }
        let records = self.records();
        let mut stats = StoreStats {
            total_records: records.len() as i64,
            recent_24h_count: records.len() as i64,
            ..StoreStats::default()
        };
        let mut devices = HashSet::new();
        for record in &records {
            *stats
                .priority_stats
                .entry(i64::from(record.priority().as_u8()))
                .or_default() += 1;
            devices.insert(record.device_id().to_string());
        }
        stats.device_count = devices.len() as i64;
        Ok(stats)
    }
}

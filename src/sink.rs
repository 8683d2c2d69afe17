use crate::record::Record;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Durable destination for flushed batches.
///
/// `write_batch` is all-or-nothing from the pipeline's point of view: an
/// `Err` means the whole batch is considered lost.
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    async fn write_batch(&self, records: &[Record]) -> Result<(), SinkError>;

    async fn ping(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Releases connections. Called once, after the batcher has finished or
    /// been abandoned.
    async fn close(&self) {}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub total_records: i64,
    pub priority_stats: BTreeMap<i64, i64>,
    pub recent_24h_count: i64,
    pub device_count: i64,
    pub total_alerts: i64,
}

/// Read-only aggregate queries served by `/api/stats`.
#[async_trait]
pub trait StoreStatsSource: Send + Sync + 'static {
    async fn store_stats(&self) -> Result<StoreStats, SinkError>;
}

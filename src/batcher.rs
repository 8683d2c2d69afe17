//! The single consumer of the ingest queue.
//!
//! Records are appended to an in-memory batch that is written to the sink
//! once it reaches `batch_size`, or when `flush_interval` has passed since
//! the previous flush and the batch is not empty. A failed write is logged
//! and the batch is dropped; there is no retry and no requeue.

use crate::queue::QueueReceiver;
use crate::record::Record;
use crate::sink::Sink;
use crate::stats::IngestStats;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushTrigger {
    Size,
    Interval,
    Shutdown,
}

impl FlushTrigger {
    fn as_str(self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Interval => "interval",
            FlushTrigger::Shutdown => "shutdown",
        }
    }
}

pub struct Batcher {
    sink: Arc<dyn Sink>,
    queue: QueueReceiver,
    stats: Arc<IngestStats>,
    batch_size: usize,
    flush_interval: Duration,
    batch: Vec<Record>,
}

impl Batcher {
    pub fn new(
        sink: Arc<dyn Sink>,
        queue: QueueReceiver,
        stats: Arc<IngestStats>,
        batch_size: usize,
        flush_interval: Duration,
    ) -> Self {
        let batch_size = batch_size.max(1);
        // tokio intervals panic on a zero period.
        let flush_interval = flush_interval.max(Duration::from_millis(1));
        Self {
            sink,
            queue,
            stats,
            batch_size,
            flush_interval,
            batch: Vec::with_capacity(batch_size),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until the queue is closed and drained, then flushes whatever is
    /// left and returns.
    pub async fn run(mut self) {
        let mut ticker = time::interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Draining first keeps a size flush ahead of a simultaneous tick.
                biased;
                next = self.queue.dequeue() => match next {
                    Some(record) => {
                        self.batch.push(record);
                        if self.batch.len() >= self.batch_size {
                            self.flush(FlushTrigger::Size).await;
                            ticker.reset();
                        }
                    }
                    None => {
                        self.flush(FlushTrigger::Shutdown).await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !self.batch.is_empty() {
                        self.flush(FlushTrigger::Interval).await;
                        ticker.reset();
                    }
                }
            }
        }

        tracing::info!("ingest queue drained; batcher stopped");
    }

    async fn flush(&mut self, trigger: FlushTrigger) {
        if self.batch.is_empty() {
            return;
        }

        let len = self.batch.len();
        let started = std::time::Instant::now();
        self.stats.inflight_flushes.fetch_add(1, Ordering::Relaxed);
        let result = self.sink.write_batch(&self.batch).await;
        self.stats.inflight_flushes.fetch_sub(1, Ordering::Relaxed);

        match result {
            Ok(()) => {
                let elapsed = started.elapsed();
                self.stats.record_flush(len, elapsed);
                tracing::debug!(
                    len,
                    micros = elapsed.as_micros() as u64,
                    trigger = trigger.as_str(),
                    "flushed sensor batch"
                );
            }
            Err(err) => {
                self.stats.record_failed_flush(len, err.to_string());
                tracing::error!(
                    error = %err,
                    dropped = len,
                    trigger = trigger.as_str(),
                    "failed to flush sensor batch; dropping records"
                );
            }
        }

        self.batch.clear();
    }
}

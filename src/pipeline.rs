use crate::admission::AdmissionGate;
use crate::batcher::Batcher;
use crate::config::PipelineSettings;
use crate::queue::{self, QueueHandle};
use crate::sink::Sink;
use crate::stats::IngestStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The batcher drained the queue and made its final flush.
    Drained,
    /// The deadline passed first; whatever was still buffered is lost.
    TimedOut,
    /// The batcher task ended abnormally (panicked or was cancelled).
    WorkerFailed,
}

/// Owns the queue, the batcher task and the sink for the life of the
/// process.
pub struct Pipeline {
    queue: QueueHandle,
    gate: AdmissionGate,
    stats: Arc<IngestStats>,
    sink: Arc<dyn Sink>,
    worker: JoinHandle<()>,
    shutdown_deadline: Duration,
}

impl Pipeline {
    /// Must be called from inside a tokio runtime.
    pub fn start(sink: Arc<dyn Sink>, settings: PipelineSettings) -> Self {
        let stats = Arc::new(IngestStats::new());
        let (queue, rx) = queue::bounded(settings.queue_capacity.max(1));
        let worker = Batcher::new(
            sink.clone(),
            rx,
            stats.clone(),
            settings.batch_size,
            settings.flush_interval,
        )
        .spawn();
        tracing::info!(
            queue_capacity = queue.capacity(),
            batch_size = settings.batch_size,
            flush_interval_ms = settings.flush_interval.as_millis() as u64,
            "ingest pipeline started"
        );

        Self {
            gate: AdmissionGate::new(queue.clone(), stats.clone()),
            queue,
            stats,
            sink,
            worker,
            shutdown_deadline: settings.shutdown_deadline,
        }
    }

    pub fn gate(&self) -> AdmissionGate {
        self.gate.clone()
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    /// Closes the queue, gives the batcher up to the shutdown deadline to
    /// drain, then releases the sink. Callers stop their own intake first.
    pub async fn shutdown(self) -> ShutdownOutcome {
        let Self {
            queue,
            sink,
            mut worker,
            shutdown_deadline,
            ..
        } = self;

        tracing::info!(buffered = queue.len(), "closing ingest queue");
        queue.close();

        let outcome = match tokio::time::timeout(shutdown_deadline, &mut worker).await {
            Ok(Ok(())) => ShutdownOutcome::Drained,
            Ok(Err(err)) => {
                tracing::error!(error = %err, "batcher task failed during shutdown");
                ShutdownOutcome::WorkerFailed
            }
            Err(_) => {
                worker.abort();
                tracing::warn!(
                    deadline_ms = shutdown_deadline.as_millis() as u64,
                    lost = queue.len(),
                    "batcher did not drain before the shutdown deadline; buffered readings are lost"
                );
                ShutdownOutcome::TimedOut
            }
        };

        sink.close().await;
        outcome
    }
}

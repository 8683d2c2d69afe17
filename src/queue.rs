//! Fixed-capacity FIFO between admission and the batcher.
//!
//! Producers hold cloned [`QueueHandle`]s and only ever `try_enqueue`; the
//! batcher owns the single [`QueueReceiver`]. Closing is signalled through a
//! shared token so that the handle clones held by the HTTP layer do not have
//! to be dropped before the batcher can drain and finish.

use crate::record::Record;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("ingest queue is full")]
    Full,
    #[error("ingest queue is closed")]
    Closed,
}

/// Builds a queue holding at most `capacity` records. `capacity` must be
/// non-zero.
pub fn bounded(capacity: usize) -> (QueueHandle, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let closed = CancellationToken::new();
    (
        QueueHandle {
            tx,
            closed: closed.clone(),
        },
        QueueReceiver { rx, closed },
    )
}

#[derive(Clone, Debug)]
pub struct QueueHandle {
    tx: mpsc::Sender<Record>,
    closed: CancellationToken,
}

impl QueueHandle {
    /// Never waits: a full queue is reported immediately.
    pub fn try_enqueue(&self, record: Record) -> Result<(), EnqueueError> {
        if self.closed.is_cancelled() {
            return Err(EnqueueError::Closed);
        }
        self.tx.try_send(record).map_err(|err| match err {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Refuses further enqueues. Records already buffered stay available to
    /// the receiver until drained.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<Record>,
    closed: CancellationToken,
}

impl QueueReceiver {
    /// Waits for the next record. Returns `None` once the queue has been
    /// closed (or every handle dropped) and nothing is left buffered.
    ///
    /// Cancel safe, so it can sit in a `select!` next to the flush timer.
    pub async fn dequeue(&mut self) -> Option<Record> {
        tokio::select! {
            biased;
            record = self.rx.recv() => record,
            _ = self.closed.cancelled() => {
                self.rx.close();
                self.rx.recv().await
            }
        }
    }
}

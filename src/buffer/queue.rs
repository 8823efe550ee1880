use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::ProxyError;

/// Producer handle for the bounded request queue. Cloneable — every
/// listener task enqueuing a frame holds one (spec.md §4.6: "many
/// concurrent listener tasks" on the producer side).
#[derive(Clone)]
pub struct QueueProducer {
    tx: mpsc::Sender<Vec<u8>>,
    len: Arc<AtomicUsize>,
}

/// Single-consumer receiver for the drain worker.
pub struct QueueConsumer {
    rx: mpsc::Receiver<Vec<u8>>,
    len: Arc<AtomicUsize>,
}

/// Build a bounded FIFO queue. Internal synchronization is `tokio::sync::
/// mpsc`'s own — a full queue makes `enqueue` wait rather than drop
/// (spec.md §4.6: "producers block until space, FIFO fairness").
pub fn bounded(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    let len = Arc::new(AtomicUsize::new(0));
    (
        QueueProducer { tx, len: len.clone() },
        QueueConsumer { rx, len },
    )
}

impl QueueProducer {
    pub async fn enqueue(&self, frame: Vec<u8>) -> Result<(), ProxyError> {
        // Count the item as queued before it is actually visible to the
        // consumer, not after — otherwise a consumer can recv() and
        // fetch_sub() before this fetch_add() runs, underflowing `len` to
        // usize::MAX (which would then be published verbatim as the
        // buffer's queue-length metric).
        self.len.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(frame).await.is_err() {
            self.len.fetch_sub(1, Ordering::AcqRel);
            return Err(ProxyError::Internal("request buffer is shut down".to_string()));
        }
        Ok(())
    }

    /// Approximate current queue length (for metrics; racy by design — the
    /// stats emitter only needs a point-in-time sample, spec.md §4.6).
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }
}

impl QueueConsumer {
    pub async fn dequeue(&mut self) -> Option<Vec<u8>> {
        let frame = self.rx.recv().await;
        if frame.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }
}

use async_channel::{Receiver, Sender};

use crate::error::QueueError;

/// Bounded FIFO hand-off between the ingestion driver and the worker pool.
///
/// `enqueue` suspends while the queue is full, `dequeue` suspends while it is
/// empty. After `close`, consumers drain whatever is still buffered and then
/// observe `None`. Cloning yields another handle to the same queue.
pub struct WorkQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> WorkQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// # Panics
    /// If `capacity` is zero.
    pub fn bounded(capacity: usize) -> Self {
        assert!(capacity > 0, "work queue capacity must be non-zero");
        let (tx, rx) = async_channel::bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Push an item, waiting for space if the queue is full.
    pub async fn enqueue(&self, item: T) -> Result<(), QueueError> {
        self.tx.send(item).await.map_err(|_| QueueError::Closed)
    }

    /// Pop the oldest item. Returns `None` once the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<T> {
        self.rx.recv().await.ok()
    }

    /// Signal that no more items will be enqueued. Closing twice is an error.
    pub fn close(&self) -> Result<(), QueueError> {
        if self.tx.close() {
            Ok(())
        } else {
            Err(QueueError::AlreadyClosed)
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

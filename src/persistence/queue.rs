//! Bounded persistence queues
//!
//! Each queue is a bounded FIFO with exactly one consumer, guaranteeing
//! that writes to the same physical destination never race. Producers do
//! not block under normal load; a queue at capacity logs a warning and the
//! producer blocks until the consumer frees space. Stalling an upsert is
//! preferable to silently dropping a durability-critical write.

use crate::errors::{KeyplaneError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Observable depth of a queue, shared between producer, consumer, and the
/// status tracker.
#[derive(Debug, Clone)]
pub struct QueueDepth {
    name: Arc<str>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
}

impl QueueDepth {
    /// Queue name for logging and status reporting
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of items currently queued
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued items
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn increment(&self) {
        self.depth.fetch_add(1, Ordering::Relaxed);
    }

    fn decrement(&self) {
        // Saturating: a racing snapshot must never underflow the gauge.
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }
}

/// Producer half of a persistence queue
#[derive(Debug, Clone)]
pub struct PersistQueue<T> {
    tx: mpsc::Sender<T>,
    depth: QueueDepth,
}

impl<T> PersistQueue<T> {
    /// Enqueue an item, blocking when the queue is full.
    pub async fn send(&self, item: T) -> Result<()> {
        if self.depth.len() >= self.depth.capacity() {
            warn!(
                queue = self.depth.name(),
                capacity = self.depth.capacity(),
                "queue at capacity; enqueue will block until the consumer frees space"
            );
        }

        self.tx
            .send(item)
            .await
            .map_err(|_| KeyplaneError::internal(format!("queue {} is closed", self.depth.name())))?;
        self.depth.increment();
        Ok(())
    }

    /// Depth handle for status reporting
    pub fn depth(&self) -> QueueDepth {
        self.depth.clone()
    }
}

/// Consumer half of a persistence queue. There is exactly one per queue.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
    depth: QueueDepth,
}

impl<T> QueueReceiver<T> {
    /// Receive the next item in arrival order. Returns `None` once all
    /// producers are gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<T> {
        let item = self.rx.recv().await;
        if item.is_some() {
            self.depth.decrement();
        }
        item
    }

    /// Non-blocking receive, used to drain the queue during shutdown.
    pub fn try_recv(&mut self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => {
                self.depth.decrement();
                Some(item)
            }
            Err(_) => None,
        }
    }

    /// Queue name for logging
    pub fn name(&self) -> String {
        self.depth.name().to_string()
    }
}

/// Create a bounded queue with the given name and capacity.
pub fn bounded<T>(name: &str, capacity: usize) -> (PersistQueue<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    let depth = QueueDepth {
        name: Arc::from(name),
        depth: Arc::new(AtomicUsize::new(0)),
        capacity,
    };
    (PersistQueue { tx, depth: depth.clone() }, QueueReceiver { rx, depth })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = bounded::<u32>("test", 8);
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        tx.send(3).await.unwrap();
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test]
    async fn test_depth_tracks_send_and_recv() {
        let (tx, mut rx) = bounded::<u32>("test", 8);
        let depth = tx.depth();
        assert_eq!(depth.len(), 0);
        assert_eq!(depth.capacity(), 8);

        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        assert_eq!(depth.len(), 2);

        rx.recv().await;
        assert_eq!(depth.len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_blocks_until_consumed() {
        let (tx, mut rx) = bounded::<u32>("test", 1);
        tx.send(1).await.unwrap();

        let blocked = tokio::spawn(async move {
            tx.send(2).await.unwrap();
            tx
        });

        // The second send cannot complete while the queue is full.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        assert_eq!(rx.recv().await, Some(1));
        let tx = blocked.await.unwrap();
        assert_eq!(rx.recv().await, Some(2));
        drop(tx);
    }

    #[tokio::test]
    async fn test_try_recv_drains() {
        let (tx, mut rx) = bounded::<u32>("test", 4);
        tx.send(7).await.unwrap();
        assert_eq!(rx.try_recv(), Some(7));
        assert_eq!(rx.try_recv(), None);
    }

    #[tokio::test]
    async fn test_send_to_closed_queue_errors() {
        let (tx, rx) = bounded::<u32>("test", 4);
        drop(rx);
        assert!(matches!(tx.send(1).await, Err(KeyplaneError::Internal(_))));
    }
}

//! Status tracking
//!
//! Live counts of stored secrets and persistence queue depths for
//! observability. The secret count mutates under a narrow lock on every
//! index insert/remove; queue depths are read live at snapshot time, never
//! cached.

use crate::persistence::QueueDepth;
use serde::Serialize;
use std::sync::RwLock;

/// Current state of the secret store
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    /// Total number of secrets currently indexed
    pub num_secrets: usize,
    /// Length and capacity of each persistence queue
    pub queues: Vec<QueueStatus>,
}

/// Depth of one persistence queue
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub name: String,
    pub len: usize,
    pub capacity: usize,
}

/// Tracker for secret counts and queue depths
#[derive(Debug, Default)]
pub struct StatusTracker {
    num_secrets: RwLock<usize>,
    queues: RwLock<Vec<QueueDepth>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue so its depth appears in snapshots
    pub fn register_queue(&self, depth: QueueDepth) {
        let mut guard = match self.queues.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(depth);
    }

    /// Count a secret as stored, unless the index already holds it.
    /// Called before the index insert; the gate prevents double counting
    /// on redundant calls.
    pub fn increment<F: Fn(&str) -> bool>(&self, name: &str, index_has: F) {
        let mut guard = match self.num_secrets.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !index_has(name) {
            *guard += 1;
        }
    }

    /// Count a secret as removed, but only if the index still holds it.
    pub fn decrement<F: Fn(&str) -> bool>(&self, name: &str, index_has: F) {
        let mut guard = match self.num_secrets.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if index_has(name) {
            *guard = guard.saturating_sub(1);
        }
    }

    /// Compute the current status. Queue depths are read at call time.
    pub fn snapshot(&self) -> Status {
        let num_secrets = {
            let guard = match self.num_secrets.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard
        };

        let queues = {
            let guard = match self.queues.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard
                .iter()
                .map(|depth| QueueStatus {
                    name: depth.name().to_string(),
                    len: depth.len(),
                    capacity: depth.capacity(),
                })
                .collect()
        };

        Status { num_secrets, queues }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::bounded;

    #[test]
    fn test_increment_gated_on_index_absence() {
        let tracker = StatusTracker::new();
        tracker.increment("a", |_| false);
        tracker.increment("a", |_| true); // already indexed: no double count
        assert_eq!(tracker.snapshot().num_secrets, 1);
    }

    #[test]
    fn test_decrement_gated_on_index_presence() {
        let tracker = StatusTracker::new();
        tracker.increment("a", |_| false);
        tracker.decrement("a", |_| true);
        tracker.decrement("a", |_| false); // already removed: no underflow
        assert_eq!(tracker.snapshot().num_secrets, 0);
    }

    #[tokio::test]
    async fn test_snapshot_reads_queue_depth_live() {
        let tracker = StatusTracker::new();
        let (tx, mut rx) = bounded::<u32>("upsert", 8);
        tracker.register_queue(tx.depth());

        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();

        let status = tracker.snapshot();
        assert_eq!(status.queues.len(), 1);
        assert_eq!(status.queues[0].name, "upsert");
        assert_eq!(status.queues[0].len, 2);
        assert_eq!(status.queues[0].capacity, 8);

        rx.recv().await;
        assert_eq!(tracker.snapshot().queues[0].len, 1);
    }
}

//! Asynchronous persistence pipeline.
//!
//! Bounded FIFO queues carry secret changes from the store to dedicated
//! worker tasks, one per queue, which replicate them into the configured
//! backing store with retry-on-failure.

mod queue;
mod retry;
mod worker;

pub use queue::{bounded, PersistQueue, QueueDepth, QueueReceiver};
pub use retry::{retry, RetryPolicy};
pub use worker::{build_channels, spawn_workers, QueueReceivers, StoreQueues, WorkerHandle};

//! Persistence queue workers
//!
//! Exactly one worker task drains each persistence queue, serializing all
//! writes for that destination. Workers dispatch through the adapter
//! registry, bound each adapter call with a deadline, retry transient
//! failures with backoff, and report exhausted retries to the error sink
//! (the log) without crashing. Shutdown is an explicit watch signal;
//! workers drain their queue before exiting.

use crate::adapters::{AdapterRegistry, BackingStoreAdapter, ClusterObjectAdapter};
use crate::config::{AppConfig, QueueConfig};
use crate::domain::{BackingStoreKind, SecretRecord};
use crate::errors::KeyplaneError;
use crate::persistence::{bounded, retry, PersistQueue, QueueReceiver, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

/// Producer ends of the four persistence queues, held by the secret store
#[derive(Debug, Clone)]
pub struct StoreQueues {
    pub upsert: PersistQueue<SecretRecord>,
    pub delete: PersistQueue<SecretRecord>,
    pub cluster_upsert: PersistQueue<SecretRecord>,
    pub cluster_delete: PersistQueue<SecretRecord>,
}

/// Consumer ends of the four persistence queues, owned by the workers
#[derive(Debug)]
pub struct QueueReceivers {
    pub upsert: QueueReceiver<SecretRecord>,
    pub delete: QueueReceiver<SecretRecord>,
    pub cluster_upsert: QueueReceiver<SecretRecord>,
    pub cluster_delete: QueueReceiver<SecretRecord>,
}

/// Create the four bounded persistence queues.
pub fn build_channels(config: &QueueConfig) -> (StoreQueues, QueueReceivers) {
    let (upsert_tx, upsert_rx) = bounded("upsert", config.upsert_capacity);
    let (delete_tx, delete_rx) = bounded("delete", config.delete_capacity);
    let (cluster_upsert_tx, cluster_upsert_rx) =
        bounded("cluster-upsert", config.cluster_capacity);
    let (cluster_delete_tx, cluster_delete_rx) =
        bounded("cluster-delete", config.cluster_capacity);

    (
        StoreQueues {
            upsert: upsert_tx,
            delete: delete_tx,
            cluster_upsert: cluster_upsert_tx,
            cluster_delete: cluster_delete_tx,
        },
        QueueReceivers {
            upsert: upsert_rx,
            delete: delete_rx,
            cluster_upsert: cluster_upsert_rx,
            cluster_delete: cluster_delete_rx,
        },
    )
}

/// The persistence operation a worker applies to dequeued records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PersistOp {
    Upsert,
    Delete,
}

impl PersistOp {
    fn scope(&self) -> &'static str {
        match self {
            Self::Upsert => "persist-upsert",
            Self::Delete => "persist-delete",
        }
    }
}

/// Handle for controlling the running persistence workers
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Signal all workers to drain their queues and exit
    pub fn shutdown(&self) {
        info!("initiating persistence worker shutdown");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for all workers to finish. Consumes the handle.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Spawn one worker task per persistence queue.
pub fn spawn_workers(
    config: Arc<AppConfig>,
    registry: Arc<AdapterRegistry>,
    cluster_adapter: Option<Arc<ClusterObjectAdapter>>,
    receivers: QueueReceivers,
) -> WorkerHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let op_timeout = config.store.op_timeout();

    let handles = vec![
        tokio::spawn(run_backing_store_worker(
            receivers.upsert,
            shutdown_rx.clone(),
            Arc::clone(&config),
            Arc::clone(&registry),
            PersistOp::Upsert,
        )),
        tokio::spawn(run_backing_store_worker(
            receivers.delete,
            shutdown_rx.clone(),
            Arc::clone(&config),
            Arc::clone(&registry),
            PersistOp::Delete,
        )),
        tokio::spawn(run_cluster_worker(
            receivers.cluster_upsert,
            shutdown_rx.clone(),
            cluster_adapter.clone(),
            PersistOp::Upsert,
            op_timeout,
        )),
        tokio::spawn(run_cluster_worker(
            receivers.cluster_delete,
            shutdown_rx,
            cluster_adapter,
            PersistOp::Delete,
            op_timeout,
        )),
    ];

    WorkerHandle { shutdown_tx, handles }
}

async fn run_backing_store_worker(
    mut rx: QueueReceiver<SecretRecord>,
    mut shutdown_rx: watch::Receiver<bool>,
    config: Arc<AppConfig>,
    registry: Arc<AdapterRegistry>,
    op: PersistOp,
) {
    info!(queue = %rx.name(), "persistence worker started");

    loop {
        tokio::select! {
            item = rx.recv() => match item {
                Some(record) => {
                    process_backing_store(&config, &registry, op, record, &shutdown_rx).await;
                }
                None => break,
            },
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    let mut drained = 0;
                    while let Some(record) = rx.try_recv() {
                        process_backing_store(&config, &registry, op, record, &shutdown_rx).await;
                        drained += 1;
                    }
                    info!(queue = %rx.name(), drained, "persistence worker shutdown complete");
                    break;
                }
            }
        }
    }
}

async fn process_backing_store(
    config: &AppConfig,
    registry: &AdapterRegistry,
    op: PersistOp,
    record: SecretRecord,
    shutdown_rx: &watch::Receiver<bool>,
) {
    let kind = record.meta.backing_store.unwrap_or(config.store.backing_store);

    if kind == BackingStoreKind::Memory {
        trace!(secret = %record.name, "in-memory store; nothing to persist");
        return;
    }

    let adapter = match registry.get(kind) {
        Ok(adapter) => adapter,
        Err(e) => {
            error!(secret = %record.name, backing_store = %kind, error = %e,
                "cannot persist secret");
            return;
        }
    };

    // Park the record while the store warms up; poll with a sleep instead
    // of busy-spinning.
    while !adapter.ready().await {
        if *shutdown_rx.borrow() {
            warn!(secret = %record.name, backing_store = %kind,
                "shutting down before the backing store became ready; abandoning record");
            return;
        }
        trace!(backing_store = %kind, "backing store not ready; parking");
        tokio::time::sleep(config.store.ready_poll_interval()).await;
    }

    let timeout = config.store.op_timeout();
    let result = retry(op.scope(), &RetryPolicy::default(), || {
        let adapter = Arc::clone(&adapter);
        let record = &record;
        async move { apply(adapter.as_ref(), op, record, timeout).await }
    })
    .await;

    if let Err(e) = result {
        error!(secret = %record.name, backing_store = %kind, error = %e,
            "persistence failed after retries");
    }
}

async fn run_cluster_worker(
    mut rx: QueueReceiver<SecretRecord>,
    mut shutdown_rx: watch::Receiver<bool>,
    adapter: Option<Arc<ClusterObjectAdapter>>,
    op: PersistOp,
    timeout: Duration,
) {
    info!(queue = %rx.name(), "cluster mirror worker started");

    loop {
        tokio::select! {
            item = rx.recv() => match item {
                Some(record) => process_cluster(adapter.as_deref(), op, record, timeout).await,
                None => break,
            },
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    let mut drained = 0;
                    while let Some(record) = rx.try_recv() {
                        process_cluster(adapter.as_deref(), op, record, timeout).await;
                        drained += 1;
                    }
                    info!(queue = %rx.name(), drained, "cluster mirror worker shutdown complete");
                    break;
                }
            }
        }
    }
}

async fn process_cluster(
    adapter: Option<&ClusterObjectAdapter>,
    op: PersistOp,
    record: SecretRecord,
    timeout: Duration,
) {
    let Some(adapter) = adapter else {
        warn!(secret = %record.name, "no cluster object client configured; cannot mirror");
        return;
    };

    // Per-namespace retries happen inside the adapter.
    if let Err(e) = apply(adapter, op, &record, timeout).await {
        error!(secret = %record.name, error = %e, "cluster mirroring failed");
    }
}

async fn apply(
    adapter: &dyn BackingStoreAdapter,
    op: PersistOp,
    record: &SecretRecord,
    timeout: Duration,
) -> crate::errors::Result<()> {
    let fut = match op {
        PersistOp::Upsert => adapter.upsert(record),
        PersistOp::Delete => adapter.delete(record),
    };

    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(KeyplaneError::timeout(op.scope(), timeout.as_millis() as u64)),
    }
}

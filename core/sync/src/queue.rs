//! Durable FIFO of writes waiting for connectivity.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::connectivity::ConnectivityMonitor;
use crate::operation::{OperationRouter, OperationUpdate, Payload, ProcessResult, SyncOperation, SyncOperationKind};
use crate::retry::RetryPolicy;
use embaixada_common::{Clock, Error, OperationId, Result};
use embaixada_storage::KeyValueStore;

/// Store key holding the serialized queue.
pub const QUEUE_KEY: &str = "@sync_queue";

/// Persistent operation queue.
///
/// The whole list is stored as one JSON array. Every read-modify-write of
/// that array happens under `list_lock`, and whole drain passes are
/// serialized under `drain_lock`, so `enqueue` never waits for a network
/// call and two drains never dispatch the same operation.
pub struct SyncQueue {
    store: Arc<dyn KeyValueStore>,
    monitor: ConnectivityMonitor,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    list_lock: Mutex<()>,
    drain_lock: Mutex<()>,
}

impl SyncQueue {
    /// Create a queue with the default retry policy.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        monitor: ConnectivityMonitor,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_policy(store, monitor, clock, RetryPolicy::default())
    }

    /// Create a queue with a custom retry policy.
    pub fn with_policy(
        store: Arc<dyn KeyValueStore>,
        monitor: ConnectivityMonitor,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            monitor,
            clock,
            policy,
            list_lock: Mutex::new(()),
            drain_lock: Mutex::new(()),
        }
    }

    /// The retry policy in effect.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Append a new operation.
    ///
    /// # Errors
    /// - Store read/write failure
    pub async fn enqueue(&self, kind: SyncOperationKind, payload: Payload) -> Result<SyncOperation> {
        let _guard = self.list_lock.lock().await;
        let mut ops = self.load().await?;

        let now = self.clock.now_millis();
        let mut id = OperationId::generate(now);
        while ops.iter().any(|op| op.id == id) {
            id = OperationId::generate(now);
        }

        let op = SyncOperation {
            id,
            kind,
            payload,
            created_at: now,
            retry_count: 0,
            last_error: None,
        };
        ops.push(op.clone());
        self.save(&ops).await?;

        info!("Queued {} operation {}", op.kind, op.id);
        Ok(op)
    }

    /// Append an operation whose payload is any JSON object.
    ///
    /// # Errors
    /// - `payload` is not a JSON object
    pub async fn enqueue_value(&self, kind: SyncOperationKind, payload: Value) -> Result<SyncOperation> {
        match payload {
            Value::Object(map) => self.enqueue(kind, map).await,
            other => Err(Error::InvalidInput(format!(
                "Operation payload must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// All pending operations in FIFO order.
    pub async fn get_all(&self) -> Result<Vec<SyncOperation>> {
        let _guard = self.list_lock.lock().await;
        self.load().await
    }

    /// Number of pending operations.
    pub async fn count(&self) -> Result<usize> {
        Ok(self.get_all().await?.len())
    }

    /// Remove an operation. Absent ids are ignored.
    pub async fn dequeue(&self, id: &OperationId) -> Result<()> {
        let _guard = self.list_lock.lock().await;
        let mut ops = self.load().await?;
        let before = ops.len();
        ops.retain(|op| &op.id != id);
        if ops.len() != before {
            self.save(&ops).await?;
            debug!("Dequeued operation {}", id);
        }
        Ok(())
    }

    /// Merge `update` into an operation.
    ///
    /// # Returns
    /// The updated operation, or `None` if `id` is not queued.
    pub async fn update(&self, id: &OperationId, update: OperationUpdate) -> Result<Option<SyncOperation>> {
        let _guard = self.list_lock.lock().await;
        let mut ops = self.load().await?;
        let Some(op) = ops.iter_mut().find(|op| &op.id == id) else {
            return Ok(None);
        };
        update.apply(op);
        let updated = op.clone();
        self.save(&ops).await?;
        Ok(Some(updated))
    }

    /// Drop every pending operation.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.list_lock.lock().await;
        self.store.remove(QUEUE_KEY).await?;
        info!("Sync queue cleared");
        Ok(())
    }

    /// Deliver every queued operation once, oldest first.
    ///
    /// Does nothing while offline. Router failures are recorded on the
    /// operation and never returned; an operation is evicted once the retry
    /// policy gives up on it. Operations enqueued during the pass wait for
    /// the next one.
    ///
    /// # Errors
    /// - Store read/write failure
    pub async fn process_all<R>(&self, router: &R) -> Result<ProcessResult>
    where
        R: OperationRouter + ?Sized,
    {
        let _drain = self.drain_lock.lock().await;
        let mut result = ProcessResult::default();

        if !self.monitor.is_online().await {
            debug!("Offline, skipping sync pass");
            return Ok(result);
        }

        let snapshot: Vec<OperationId> = self.get_all().await?.into_iter().map(|op| op.id).collect();
        if snapshot.is_empty() {
            return Ok(result);
        }
        info!("Processing {} queued operations", snapshot.len());

        for id in snapshot {
            // Cleared or dequeued since the snapshot
            let Some(op) = self.find(&id).await? else {
                continue;
            };

            match router.dispatch(&op).await {
                Ok(()) => {
                    self.dequeue(&op.id).await?;
                    result.success += 1;
                    debug!("Delivered {} operation {}", op.kind, op.id);
                }
                Err(e) => {
                    result.failed += 1;
                    let retry_count = op.retry_count.saturating_add(1);

                    if self.policy.should_evict(retry_count, &e) {
                        warn!(
                            "Dropping {} operation {} after {} attempts: {}",
                            op.kind, op.id, retry_count, e
                        );
                        self.dequeue(&op.id).await?;
                        result.evicted.push(op.id);
                    } else {
                        warn!(
                            "{} operation {} failed (attempt {}): {}",
                            op.kind, op.id, retry_count, e
                        );
                        self.update(&op.id, OperationUpdate::failed(retry_count, e.to_string()))
                            .await?;
                    }
                }
            }
        }

        info!(
            "Sync pass finished: {} delivered, {} failed, {} dropped",
            result.success,
            result.failed,
            result.evicted.len()
        );
        Ok(result)
    }

    async fn find(&self, id: &OperationId) -> Result<Option<SyncOperation>> {
        Ok(self.get_all().await?.into_iter().find(|op| &op.id == id))
    }

    async fn load(&self) -> Result<Vec<SyncOperation>> {
        match self.store.get(QUEUE_KEY).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| Error::Serialization(format!("Corrupt sync queue: {}", e))),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, ops: &[SyncOperation]) -> Result<()> {
        let raw = serde_json::to_string(ops).map_err(|e| Error::Serialization(e.to_string()))?;
        self.store.set(QUEUE_KEY, raw).await
    }
}

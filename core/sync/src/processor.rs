//! Connectivity-driven drain of the sync queue.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connectivity::{ConnectivityMonitor, Subscription};
use crate::operation::{OperationRouter, ProcessResult};
use crate::queue::SyncQueue;
use embaixada_common::{Error, Result};

/// Snapshot of sync activity for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Whether the processor reacts to connectivity changes.
    pub listening: bool,
    pub online: bool,
    /// Operations waiting in the queue.
    pub pending: usize,
    /// Outcome of the most recent pass, if any ran.
    pub last_result: Option<ProcessResult>,
}

struct Listening {
    subscription: Subscription,
    stopped: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

impl Listening {
    /// Cancel the subscription and refuse triggers still buffered.
    fn halt(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.subscription.unsubscribe();
    }
}

/// Drains the queue whenever the device comes back online.
///
/// While listening, each offline-to-online transition sends a trigger to a
/// background worker that runs one [`SyncQueue::process_all`] pass. Triggers
/// that arrive while a pass is already pending are coalesced.
pub struct SyncProcessor {
    queue: Arc<SyncQueue>,
    router: Arc<dyn OperationRouter>,
    monitor: ConnectivityMonitor,
    listening: Mutex<Option<Listening>>,
    last_result: Arc<RwLock<Option<ProcessResult>>>,
}

impl SyncProcessor {
    /// Create a stopped processor.
    pub fn new(
        queue: Arc<SyncQueue>,
        router: Arc<dyn OperationRouter>,
        monitor: ConnectivityMonitor,
    ) -> Self {
        Self {
            queue,
            router,
            monitor,
            listening: Mutex::new(None),
            last_result: Arc::new(RwLock::new(None)),
        }
    }

    /// Start reacting to connectivity changes and run one pass now.
    ///
    /// Calling `start` while already listening does nothing.
    ///
    /// # Errors
    /// - Called outside a tokio runtime
    pub fn start(&self) -> Result<()> {
        let mut listening = self.lock_listening();
        if listening.is_some() {
            debug!("Sync processor already listening");
            return Ok(());
        }

        let runtime = Handle::try_current().map_err(|_| {
            Error::InvalidInput("Sync processor must be started inside a tokio runtime".to_string())
        })?;

        // One slot: a trigger sent while one is pending is dropped
        let (trigger_tx, trigger_rx) = mpsc::channel::<()>(1);

        let on_online = trigger_tx.clone();
        let subscription = self.monitor.on_change(move |online| {
            if online {
                debug!("Back online, triggering sync");
                let _ = on_online.try_send(());
            }
        });
        let _ = trigger_tx.try_send(());
        drop(trigger_tx);

        let stopped = Arc::new(AtomicBool::new(false));
        let worker = runtime.spawn(drain_loop(
            self.queue.clone(),
            self.router.clone(),
            self.last_result.clone(),
            trigger_rx,
            stopped.clone(),
        ));

        *listening = Some(Listening {
            subscription,
            stopped,
            worker,
        });
        info!("Sync processor started");
        Ok(())
    }

    /// Stop reacting to connectivity changes. Idempotent.
    ///
    /// A pass already running is allowed to finish; no new pass starts.
    pub fn stop(&self) {
        if let Some(listening) = self.lock_listening().take() {
            listening.halt();
            info!("Sync processor stopped");
        }
    }

    /// Stop and wait for the worker to finish its current pass.
    pub async fn stop_and_wait(&self) {
        let listening = self.lock_listening().take();
        if let Some(listening) = listening {
            listening.halt();
            if let Err(e) = listening.worker.await {
                warn!("Sync worker ended abnormally: {}", e);
            }
            info!("Sync processor stopped");
        }
    }

    /// Whether the processor is listening.
    pub fn is_listening(&self) -> bool {
        self.lock_listening().is_some()
    }

    /// Run one pass now, regardless of listening state.
    pub async fn process_now(&self) -> Result<ProcessResult> {
        let result = self.queue.process_all(self.router.as_ref()).await?;
        *self.last_result.write().await = Some(result.clone());
        Ok(result)
    }

    /// Number of queued operations.
    pub async fn pending_count(&self) -> Result<usize> {
        self.queue.count().await
    }

    /// Current listening, connectivity and queue state.
    pub async fn status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus {
            listening: self.is_listening(),
            online: self.monitor.is_online().await,
            pending: self.pending_count().await?,
            last_result: self.last_result.read().await.clone(),
        })
    }

    /// Run a pass and report the resulting state.
    pub async fn trigger_sync(&self) -> Result<SyncStatus> {
        self.process_now().await?;
        self.status().await
    }

    fn lock_listening(&self) -> std::sync::MutexGuard<'_, Option<Listening>> {
        match self.listening.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for SyncProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker loop. Exits once `stopped` is set or every trigger sender is gone,
/// which happens when the connectivity subscription is cancelled.
async fn drain_loop(
    queue: Arc<SyncQueue>,
    router: Arc<dyn OperationRouter>,
    last_result: Arc<RwLock<Option<ProcessResult>>>,
    mut triggers: mpsc::Receiver<()>,
    stopped: Arc<AtomicBool>,
) {
    while triggers.recv().await.is_some() {
        if stopped.load(Ordering::SeqCst) {
            debug!("Dropping trigger received after stop");
            break;
        }
        match queue.process_all(router.as_ref()).await {
            Ok(result) => {
                if result.success + result.failed > 0 {
                    info!(
                        "Background sync: {} delivered, {} failed",
                        result.success, result.failed
                    );
                }
                *last_result.write().await = Some(result);
            }
            Err(e) => error!("Background sync failed: {}", e),
        }
    }
    debug!("Sync worker exiting");
}

//! Connectivity monitoring.
//!
//! A platform network signal reports two independent facts: whether a link
//! is up and whether the internet is reachable through it. The monitor
//! collapses both into a single "usable" flag. Unknown reachability counts
//! as reachable so a missing probe never strands the app offline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

use embaixada_common::Result;

/// Raw network state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    /// Link-level connectivity.
    pub connected: bool,
    /// Internet reachability, `None` while unknown.
    pub reachable: Option<bool>,
}

impl NetworkState {
    /// Connected with confirmed reachability.
    pub fn online() -> Self {
        Self {
            connected: true,
            reachable: Some(true),
        }
    }

    /// No link.
    pub fn offline() -> Self {
        Self {
            connected: false,
            reachable: Some(false),
        }
    }

    /// Whether the network is usable for API calls.
    pub fn is_online(&self) -> bool {
        self.connected && self.reachable != Some(false)
    }
}

/// Callback invoked with each new value.
pub type Listener<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Handle returned by every `subscribe` call.
///
/// Calling [`Subscription::unsubscribe`] more than once is harmless, and
/// dropping the handle unsubscribes as well.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Wrap a cancellation closure.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// A subscription with nothing to cancel.
    pub fn noop() -> Self {
        Self {
            cancel: Mutex::new(None),
        }
    }

    /// Stop receiving notifications. Idempotent.
    pub fn unsubscribe(&self) {
        let cancel = match self.cancel.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    /// Whether the subscription is still live.
    pub fn is_active(&self) -> bool {
        match self.cancel.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Platform network-state signal.
#[async_trait]
pub trait NetworkSignal: Send + Sync {
    /// One-shot query of the current state.
    async fn fetch(&self) -> Result<NetworkState>;

    /// Register a listener called on every state change.
    fn subscribe(&self, listener: Listener<NetworkState>) -> Subscription;
}

/// Current state plus the set of listeners, shared by signal implementations.
pub struct SignalHub {
    state: RwLock<NetworkState>,
    listeners: Arc<Mutex<BTreeMap<u64, Listener<NetworkState>>>>,
    next_id: AtomicU64,
}

impl SignalHub {
    /// Create a hub starting in `initial`.
    pub fn new(initial: NetworkState) -> Self {
        Self {
            state: RwLock::new(initial),
            listeners: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Last published state.
    pub fn current(&self) -> NetworkState {
        match self.state.read() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Publish a new state. Listeners run only if the state changed.
    pub fn publish(&self, next: NetworkState) {
        {
            let mut state = match self.state.write() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *state == next {
                return;
            }
            *state = next;
        }

        debug!(
            "Network state changed: connected={}, reachable={:?}",
            next.connected, next.reachable
        );

        // Snapshot so listeners may subscribe/unsubscribe while being called
        let listeners: Vec<Listener<NetworkState>> = match self.listeners.lock() {
            Ok(map) => map.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        };
        for listener in listeners {
            listener(next);
        }
    }

    /// Register a listener.
    pub fn subscribe(&self, listener: Listener<NetworkState>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        match self.listeners.lock() {
            Ok(mut map) => map.insert(id, listener),
            Err(poisoned) => poisoned.into_inner().insert(id, listener),
        };

        let listeners = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                match listeners.lock() {
                    Ok(mut map) => map.remove(&id),
                    Err(poisoned) => poisoned.into_inner().remove(&id),
                };
            }
        })
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        match self.listeners.lock() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// In-process signal driven by explicit calls.
///
/// Used by tests and by hosts that learn about connectivity from elsewhere
/// (for example a command-line `--offline` switch).
#[derive(Clone)]
pub struct ManualSignal {
    hub: Arc<SignalHub>,
}

impl ManualSignal {
    /// Create a signal starting in `initial`.
    pub fn new(initial: NetworkState) -> Self {
        Self {
            hub: Arc::new(SignalHub::new(initial)),
        }
    }

    /// Create a signal that starts online.
    pub fn online() -> Self {
        Self::new(NetworkState::online())
    }

    /// Create a signal that starts offline.
    pub fn offline() -> Self {
        Self::new(NetworkState::offline())
    }

    /// Publish a raw state.
    pub fn set_state(&self, state: NetworkState) {
        self.hub.publish(state);
    }

    /// Publish a connected, reachable state.
    pub fn go_online(&self) {
        self.set_state(NetworkState::online());
    }

    /// Publish a disconnected state.
    pub fn go_offline(&self) {
        self.set_state(NetworkState::offline());
    }

    /// Number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        self.hub.listener_count()
    }
}

#[async_trait]
impl NetworkSignal for ManualSignal {
    async fn fetch(&self) -> Result<NetworkState> {
        Ok(self.hub.current())
    }

    fn subscribe(&self, listener: Listener<NetworkState>) -> Subscription {
        self.hub.subscribe(listener)
    }
}

const UNKNOWN: u8 = 0;
const OFFLINE: u8 = 1;
const ONLINE: u8 = 2;

/// Reachability view over a [`NetworkSignal`].
#[derive(Clone)]
pub struct ConnectivityMonitor {
    signal: Arc<dyn NetworkSignal>,
}

impl ConnectivityMonitor {
    /// Wrap a platform signal.
    pub fn new(signal: Arc<dyn NetworkSignal>) -> Self {
        Self { signal }
    }

    /// One-shot raw state query.
    pub async fn fetch(&self) -> Result<NetworkState> {
        self.signal.fetch().await
    }

    /// Whether the network is usable right now.
    ///
    /// A failing platform query is reported as offline.
    pub async fn is_online(&self) -> bool {
        match self.signal.fetch().await {
            Ok(state) => state.is_online(),
            Err(e) => {
                warn!("Connectivity query failed, assuming offline: {}", e);
                false
            }
        }
    }

    /// Subscribe to changes of the derived online flag.
    ///
    /// The callback fires only when the flag flips, not on every raw state
    /// change (a reachability probe completing while already online is not
    /// reported).
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let last = AtomicU8::new(UNKNOWN);
        self.signal.subscribe(Arc::new(move |state: NetworkState| {
            let online = state.is_online();
            let encoded = if online { ONLINE } else { OFFLINE };
            if last.swap(encoded, Ordering::SeqCst) != encoded {
                callback(online);
            }
        }))
    }
}

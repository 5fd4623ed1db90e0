//! Reachability signal from periodic HTTP health checks.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use embaixada_common::{Error, Result};
use embaixada_sync::{Listener, NetworkSignal, NetworkState, SignalHub, Subscription};

/// Network signal that polls a health URL.
///
/// Any HTTP response, whatever its status, proves the server is reachable;
/// a transport failure or timeout marks the network unusable. Until the
/// first probe completes the state is connected with unknown reachability.
pub struct HttpProbe {
    hub: SignalHub,
    http: Client,
    url: Url,
    interval: Duration,
    probed: AtomicBool,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl HttpProbe {
    /// Create a probe for `url`.
    ///
    /// # Errors
    /// - `url` is not a valid URL
    pub fn new(url: &str, interval: Duration, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::Config(format!("Invalid health URL '{}': {}", url, e)))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            hub: SignalHub::new(NetworkState {
                connected: true,
                reachable: None,
            }),
            http,
            url,
            interval,
            probed: AtomicBool::new(false),
            poller: Mutex::new(None),
        })
    }

    /// Probe once and publish the result.
    pub async fn probe(&self) -> NetworkState {
        let state = match self.http.head(self.url.clone()).send().await {
            Ok(response) => {
                debug!("Health probe answered {}", response.status());
                NetworkState::online()
            }
            Err(e) => {
                debug!("Health probe failed: {}", e);
                NetworkState::offline()
            }
        };
        self.probed.store(true, Ordering::SeqCst);
        self.hub.publish(state);
        state
    }

    /// Start polling in the background. Calling it again does nothing.
    ///
    /// The poller holds only a weak reference and ends once the probe is
    /// dropped or [`HttpProbe::stop`] is called.
    ///
    /// # Errors
    /// - Called outside a tokio runtime
    pub fn spawn(self: &Arc<Self>) -> Result<()> {
        let mut poller = lock(&self.poller);
        if poller.is_some() {
            return Ok(());
        }

        let runtime = Handle::try_current().map_err(|_| {
            Error::InvalidInput("Health probe must be started inside a tokio runtime".to_string())
        })?;
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.interval;

        *poller = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(probe) = weak.upgrade() else {
                    break;
                };
                probe.probe().await;
            }
        }));
        info!("Polling {} every {:?}", self.url, self.interval);
        Ok(())
    }

    /// Stop background polling.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.poller).take() {
            handle.abort();
        }
    }

    /// Last published state without probing.
    pub fn current(&self) -> NetworkState {
        self.hub.current()
    }
}

impl Drop for HttpProbe {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait]
impl NetworkSignal for HttpProbe {
    /// Probes on the first call; later calls return the polled state.
    async fn fetch(&self) -> Result<NetworkState> {
        if self.probed.load(Ordering::SeqCst) {
            Ok(self.hub.current())
        } else {
            Ok(self.probe().await)
        }
    }

    fn subscribe(&self, listener: Listener<NetworkState>) -> Subscription {
        self.hub.subscribe(listener)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_server;
    use axum::routing::get;
    use axum::Router;
    use embaixada_sync::ConnectivityMonitor;

    const FAST: Duration = Duration::from_millis(20);

    async fn closed_port_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}/health", addr)
    }

    #[tokio::test]
    async fn test_reachable_server_is_online() {
        let base = spawn_server(Router::new().route("/health", get(|| async { "ok" }))).await;
        let probe = Arc::new(HttpProbe::new(&format!("{}/health", base), FAST, FAST * 50).unwrap());
        let monitor = ConnectivityMonitor::new(probe.clone());

        assert!(monitor.is_online().await);
        assert_eq!(probe.current(), NetworkState::online());
    }

    #[tokio::test]
    async fn test_error_status_still_counts_as_reachable() {
        let base = spawn_server(Router::new()).await;
        let probe = HttpProbe::new(&format!("{}/missing", base), FAST, FAST * 50).unwrap();
        assert!(probe.probe().await.is_online());
    }

    #[tokio::test]
    async fn test_unreachable_is_offline() {
        let probe = HttpProbe::new(&closed_port_url().await, FAST, FAST * 50).unwrap();
        assert!(!probe.fetch().await.unwrap().is_online());
    }

    #[tokio::test]
    async fn test_polling_publishes_changes() {
        let probe = Arc::new(HttpProbe::new(&closed_port_url().await, FAST, FAST * 50).unwrap());
        let monitor = ConnectivityMonitor::new(probe.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = monitor.on_change(move |online| seen_clone.lock().unwrap().push(online));

        probe.spawn().unwrap();
        probe.spawn().unwrap();
        for _ in 0..100 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(FAST).await;
        }
        probe.stop();

        assert_eq!(seen.lock().unwrap().first(), Some(&false));
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            HttpProbe::new("::", FAST, FAST),
            Err(Error::Config(_))
        ));
    }
}

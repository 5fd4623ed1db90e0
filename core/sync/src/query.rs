//! Cache-first reads: network when possible, last known value otherwise.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{OfflineCache, Stale};
use embaixada_common::{Error, Result};

/// Produces a fresh value from the remote API.
pub type Fetcher<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Where a query result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    /// Never refreshed.
    Idle,
    /// A refresh is in flight.
    Loading,
    /// Fetched from the network during the last refresh.
    Fresh,
    /// Served from the cache; see `is_stale` for expiry.
    Stale,
    /// Nothing fetched and nothing cached.
    Empty,
}

/// Observable state of a [`CachedQuery`].
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    pub phase: QueryPhase,
    pub data: Option<T>,
    /// The cached value was past its TTL.
    pub is_stale: bool,
    pub is_loading: bool,
    /// Network error from the last refresh, kept even when cached data was
    /// served instead.
    pub error: Option<Arc<Error>>,
}

impl<T> QueryState<T> {
    fn idle() -> Self {
        Self {
            phase: QueryPhase::Idle,
            data: None,
            is_stale: false,
            is_loading: false,
            error: None,
        }
    }
}

/// A read bound to one cache key.
pub struct CachedQuery<T> {
    key: String,
    cache: Arc<OfflineCache>,
    fetcher: Fetcher<T>,
    ttl: Option<Duration>,
    state: RwLock<QueryState<T>>,
}

impl<T> CachedQuery<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create a query reading through `cache` under `key`.
    pub fn new<F, Fut>(cache: Arc<OfflineCache>, key: impl Into<String>, fetcher: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            key: key.into(),
            cache,
            fetcher: Box::new(move || fetcher().boxed()),
            ttl: None,
            state: RwLock::new(QueryState::idle()),
        }
    }

    /// Cache fetched values for `ttl` instead of the cache default.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Cache key of this query.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Latest state snapshot.
    pub fn state(&self) -> QueryState<T> {
        match self.state.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Run the cache-first strategy once.
    ///
    /// Online, a successful fetch is cached and returned as fresh. Offline,
    /// or when the fetch fails, the cached value is returned whatever its
    /// age. Cache read failures count as a miss, and a failure to store a
    /// fetched value does not hide that value.
    pub async fn refresh(&self) -> QueryState<T> {
        self.modify(|state| {
            state.phase = QueryPhase::Loading;
            state.is_loading = true;
        });

        let mut error = None;
        if self.cache.is_online().await {
            match (self.fetcher)().await {
                Ok(data) => {
                    if let Err(e) = self.cache.set(&self.key, &data, self.ttl).await {
                        warn!("Failed to cache {}: {}", self.key, e);
                    }
                    return self.finish(QueryState {
                        phase: QueryPhase::Fresh,
                        data: Some(data),
                        is_stale: false,
                        is_loading: false,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("Fetch for {} failed, falling back to cache: {}", self.key, e);
                    error = Some(Arc::new(e));
                }
            }
        }

        let cached = match self.cache.get_stale::<T>(&self.key).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Cache read for {} failed, treating as miss: {}", self.key, e);
                None
            }
        };

        let next = match cached {
            Some(Stale { data, is_stale }) => {
                debug!("Serving {} from cache (stale: {})", self.key, is_stale);
                QueryState {
                    phase: QueryPhase::Stale,
                    data: Some(data),
                    is_stale,
                    is_loading: false,
                    error,
                }
            }
            None => QueryState {
                phase: QueryPhase::Empty,
                data: None,
                is_stale: false,
                is_loading: false,
                error,
            },
        };
        self.finish(next)
    }

    fn finish(&self, next: QueryState<T>) -> QueryState<T> {
        self.modify(|state| *state = next.clone());
        next
    }

    fn modify(&self, f: impl FnOnce(&mut QueryState<T>)) {
        match self.state.write() {
            Ok(mut state) => f(&mut *state),
            Err(poisoned) => f(&mut *poisoned.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::{ConnectivityMonitor, ManualSignal};
    use embaixada_common::ManualClock;
    use embaixada_storage::{KeyValueStore, MemoryStore};
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        nome: String,
    }

    struct Fixture {
        cache: Arc<OfflineCache>,
        store: MemoryStore,
        clock: Arc<ManualClock>,
        signal: ManualSignal,
    }

    fn fixture(signal: ManualSignal) -> Fixture {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(OfflineCache::new(
            Arc::new(store.clone()),
            ConnectivityMonitor::new(Arc::new(signal.clone())),
            clock.clone(),
        ));
        Fixture {
            cache,
            store,
            clock,
            signal,
        }
    }

    fn profile(nome: &str) -> Profile {
        Profile {
            nome: nome.to_string(),
        }
    }

    fn ok_query(cache: Arc<OfflineCache>, nome: &'static str) -> CachedQuery<Profile> {
        CachedQuery::new(cache, "citizen:profile", move || async move {
            Ok::<_, Error>(profile(nome))
        })
    }

    fn failing_query(cache: Arc<OfflineCache>) -> CachedQuery<Profile> {
        CachedQuery::new(cache, "citizen:profile", || async {
            Err::<Profile, _>(Error::Network("connection refused".into()))
        })
    }

    #[tokio::test]
    async fn test_online_fetch_is_fresh_and_cached() {
        let f = fixture(ManualSignal::online());
        let query = ok_query(f.cache.clone(), "Ana");
        assert_eq!(query.state().phase, QueryPhase::Idle);

        let state = query.refresh().await;
        assert_eq!(state.phase, QueryPhase::Fresh);
        assert_eq!(state.data, Some(profile("Ana")));
        assert!(!state.is_loading);

        let cached: Option<Profile> = f.cache.get("citizen:profile").await.unwrap();
        assert_eq!(cached, Some(profile("Ana")));
        assert_eq!(query.state().phase, QueryPhase::Fresh);
    }

    #[tokio::test]
    async fn test_offline_serves_cached_profile() {
        let f = fixture(ManualSignal::online());
        ok_query(f.cache.clone(), "Ana").refresh().await;

        f.signal.go_offline();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let query = CachedQuery::new(f.cache.clone(), "citizen:profile", move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Error>(profile("Other")) }
        });

        let state = query.refresh().await;
        assert_eq!(state.phase, QueryPhase::Stale);
        assert_eq!(state.data, Some(profile("Ana")));
        assert!(!state.is_stale);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        f.clock.advance(31 * 60 * 1000);
        let state = query.refresh().await;
        assert!(state.is_stale);
        assert_eq!(state.data, Some(profile("Ana")));
    }

    #[tokio::test]
    async fn test_offline_without_cache_is_empty() {
        let f = fixture(ManualSignal::offline());
        let state = ok_query(f.cache.clone(), "Ana").refresh().await;

        assert_eq!(state.phase, QueryPhase::Empty);
        assert!(state.data.is_none());
        assert!(state.error.is_none());
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn test_fetch_error_falls_back_to_cache() {
        let f = fixture(ManualSignal::online());
        ok_query(f.cache.clone(), "Ana").refresh().await;

        let state = failing_query(f.cache.clone()).refresh().await;
        assert_eq!(state.phase, QueryPhase::Stale);
        assert_eq!(state.data, Some(profile("Ana")));
        assert!(matches!(state.error.as_deref(), Some(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_fetch_error_without_cache_keeps_error() {
        let f = fixture(ManualSignal::online());
        let state = failing_query(f.cache.clone()).refresh().await;
        assert_eq!(state.phase, QueryPhase::Empty);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn test_cache_write_failure_keeps_fresh_data() {
        let f = fixture(ManualSignal::online());
        f.store.set_fail_writes(true);

        let state = ok_query(f.cache.clone(), "Ana").refresh().await;
        assert_eq!(state.phase, QueryPhase::Fresh);
        assert_eq!(state.data, Some(profile("Ana")));
    }

    #[tokio::test]
    async fn test_corrupt_cache_is_a_miss() {
        let f = fixture(ManualSignal::offline());
        f.store
            .set("@cache:citizen:profile", "garbage".to_string())
            .await
            .unwrap();

        let state = ok_query(f.cache.clone(), "Ana").refresh().await;
        assert_eq!(state.phase, QueryPhase::Empty);
    }

    #[tokio::test]
    async fn test_loading_visible_while_in_flight() {
        let f = fixture(ManualSignal::online());
        let release = Arc::new(Notify::new());
        let release_clone = release.clone();
        let query = Arc::new(CachedQuery::new(f.cache.clone(), "slots", move || {
            let release = release_clone.clone();
            async move {
                release.notified().await;
                Ok::<_, Error>(vec!["09:00".to_string()])
            }
        }));

        let running = tokio::spawn({
            let query = query.clone();
            async move { query.refresh().await }
        });

        for _ in 0..100 {
            if query.state().is_loading {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(query.state().phase, QueryPhase::Loading);

        release.notify_one();
        let state = running.await.unwrap();
        assert_eq!(state.phase, QueryPhase::Fresh);
        assert!(!query.state().is_loading);
    }

    #[tokio::test]
    async fn test_custom_ttl_applies() {
        let f = fixture(ManualSignal::online());
        ok_query(f.cache.clone(), "Ana")
            .with_ttl(Duration::from_secs(10))
            .refresh()
            .await;

        f.clock.advance(10_001);
        let cached: Option<Profile> = f.cache.get("citizen:profile").await.unwrap();
        assert!(cached.is_none());
        assert!(f.store.get("@cache:citizen:profile").await.unwrap().is_none());
    }
}

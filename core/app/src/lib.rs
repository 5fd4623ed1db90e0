//! Embaixada application core
//!
//! Builds the offline sync stack once from configuration and hands out the
//! shared pieces: cache, queue, processor, API services and visa drafts.

pub mod config;

pub use config::{AppConfig, StoreConfig};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use embaixada_api::{
    ApiClient, ApiRouter, AppointmentService, Citizen, CitizenService, DocumentService, HttpProbe,
    PendingWrite, ProcessService, TokenProvider, VisaDrafts, VisaService,
};
use embaixada_common::{Clock, Result, SystemClock};
use embaixada_storage::{create_default_registry, KeyValueStore};
use embaixada_sync::{
    CachedQuery, ConnectivityMonitor, NetworkSignal, OfflineCache, RetryConfig, RetryExecutor,
    RetryPolicy, SyncOperation, SyncProcessor, SyncQueue,
};

/// Cache key of the signed-in citizen's profile.
pub const PROFILE_CACHE_KEY: &str = "citizen_profile";

/// What happened to a submitted write.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Delivered to the server.
    Sent,
    /// Stored for delivery once the network is back.
    Queued(SyncOperation),
}

/// Composition root of the offline sync stack.
pub struct App {
    config: AppConfig,
    store: Arc<dyn KeyValueStore>,
    monitor: ConnectivityMonitor,
    cache: Arc<OfflineCache>,
    queue: Arc<SyncQueue>,
    router: Arc<ApiRouter>,
    processor: SyncProcessor,
    client: ApiClient,
    drafts: VisaDrafts,
}

impl App {
    /// Build the stack with the system clock.
    ///
    /// # Errors
    /// - Unknown store backend or bad store options
    /// - Invalid API base URL
    pub fn build(
        config: AppConfig,
        signal: Arc<dyn NetworkSignal>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self> {
        Self::build_with_clock(config, signal, tokens, Arc::new(SystemClock))
    }

    /// Build the stack reading time from `clock`.
    pub fn build_with_clock(
        config: AppConfig,
        signal: Arc<dyn NetworkSignal>,
        tokens: Arc<dyn TokenProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let store = create_default_registry()
            .resolve(&config.store.backend, config.store.options.clone())?;
        let monitor = ConnectivityMonitor::new(signal);

        let cache = Arc::new(OfflineCache::new(store.clone(), monitor.clone(), clock.clone()));
        let queue = Arc::new(SyncQueue::with_policy(
            store.clone(),
            monitor.clone(),
            clock,
            RetryPolicy::new(config.max_sync_attempts),
        ));

        let client = ApiClient::new(&config.sgc_api_url, config.request_timeout(), tokens)?;
        let router = Arc::new(ApiRouter::new(client.clone()));
        let processor = SyncProcessor::new(queue.clone(), router.clone(), monitor.clone());
        let drafts = VisaDrafts::new(store.clone());

        info!(
            "Built app on {} store against {}",
            store.name(),
            client.base_url()
        );

        Ok(Self {
            config,
            store,
            monitor,
            cache,
            queue,
            router,
            processor,
            client,
            drafts,
        })
    }

    /// Create a reachability probe for the configured health URL.
    ///
    /// The probe is not polling yet; call [`HttpProbe::spawn`] inside a
    /// runtime.
    pub fn http_probe(config: &AppConfig) -> Result<Arc<HttpProbe>> {
        Ok(Arc::new(HttpProbe::new(
            config.health_url(),
            config.probe_interval(),
            config.request_timeout(),
        )?))
    }

    /// Begin draining the queue on connectivity changes.
    pub fn start(&self) -> Result<()> {
        self.processor.start()
    }

    /// Stop the processor and wait for an in-flight drain to finish.
    pub async fn shutdown(&self) {
        self.processor.stop_and_wait().await;
        info!("App shut down");
    }

    /// Send a write now if possible, otherwise queue it.
    ///
    /// # Errors
    /// - The server rejected the write permanently
    /// - The write could not be queued
    pub async fn submit(&self, write: PendingWrite) -> Result<Submission> {
        if !self.monitor.is_online().await {
            return self.defer(write).await;
        }

        match self.router.submit(&write).await {
            Ok(()) => Ok(Submission::Sent),
            Err(e) if e.is_permanent() => Err(e),
            Err(e) => {
                warn!("Direct {} submission failed, queueing: {}", write.kind(), e);
                self.defer(write).await
            }
        }
    }

    async fn defer(&self, write: PendingWrite) -> Result<Submission> {
        let (kind, payload) = write.into_parts()?;
        let op = self.queue.enqueue(kind, payload).await?;
        Ok(Submission::Queued(op))
    }

    /// Cache-first query using the configured TTL.
    pub fn query<T, F, Fut>(&self, key: impl Into<String>, fetcher: F) -> CachedQuery<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        CachedQuery::new(self.cache.clone(), key, fetcher).with_ttl(self.config.default_cache_ttl())
    }

    /// Cache-first read of the signed-in citizen's profile.
    ///
    /// A transient fetch failure is retried once before falling back to the
    /// cache.
    pub fn profile_query(&self) -> CachedQuery<Citizen> {
        let citizens = self.citizens();
        let retry = RetryExecutor::new(RetryConfig::new(1));
        self.query(PROFILE_CACHE_KEY, move || {
            let citizens = citizens.clone();
            let retry = retry.clone();
            async move { retry.execute(|| citizens.profile()).await }
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    pub fn cache(&self) -> &Arc<OfflineCache> {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    pub fn processor(&self) -> &SyncProcessor {
        &self.processor
    }

    pub fn drafts(&self) -> &VisaDrafts {
        &self.drafts
    }

    pub fn visas(&self) -> VisaService {
        VisaService::new(self.client.clone())
    }

    pub fn appointments(&self) -> AppointmentService {
        AppointmentService::new(self.client.clone())
    }

    pub fn citizens(&self) -> CitizenService {
        CitizenService::new(self.client.clone())
    }

    pub fn documents(&self) -> DocumentService {
        DocumentService::new(self.client.clone())
    }

    pub fn processes(&self) -> ProcessService {
        ProcessService::new(self.client.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Json, State};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::Router;
    use embaixada_api::{StaticTokenProvider, VisaCreateRequest, VisaType};
    use embaixada_common::Error;
    use embaixada_sync::{ManualSignal, QueryPhase, SyncOperationKind};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU16, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Server {
        visas: Arc<Mutex<Vec<Value>>>,
        status: Arc<AtomicU16>,
    }

    async fn create_visa(State(server): State<Server>, Json(body): Json<Value>) -> Response {
        let status = server.status.load(Ordering::SeqCst);
        if status != 0 {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return (status, Json(json!({"success": false, "message": "rejeitado"}))).into_response();
        }
        server.visas.lock().unwrap().push(body);
        Json(json!({
            "success": true,
            "data": {
                "id": "v1",
                "cidadaoId": "c1",
                "tipo": "TURISMO",
                "estado": "SUBMETIDO",
                "referencia": "VIS-1",
                "createdAt": "2024-06-01T12:00:00",
                "updatedAt": "2024-06-01T12:00:00"
            }
        }))
        .into_response()
    }

    async fn profile() -> Json<Value> {
        Json(json!({
            "success": true,
            "data": {
                "id": "c1",
                "nome": "Ana",
                "apelido": "Silva",
                "dataNascimento": "1990-04-11",
                "sexo": "FEMININO",
                "nacionalidade": "Angolana",
                "naturalidade": "Luanda",
                "email": "ana@example.org",
                "telefone": "+49 30 0000",
                "estado": "ACTIVO",
                "createdAt": "2024-06-01T12:00:00",
                "updatedAt": "2024-06-01T12:00:00"
            }
        }))
    }

    async fn serve() -> (String, Server) {
        let server = Server::default();
        let app = Router::new()
            .route("/vistos", post(create_visa))
            .route("/cidadaos/me", get(profile))
            .with_state(server.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), server)
    }

    fn app(base: &str, signal: &ManualSignal) -> App {
        let config = AppConfig {
            sgc_api_url: base.to_string(),
            ..AppConfig::default()
        };
        App::build(
            config,
            Arc::new(signal.clone()),
            Arc::new(StaticTokenProvider::new(Some("token".to_string()))),
        )
        .unwrap()
    }

    fn visa() -> PendingWrite {
        PendingWrite::CreateVisa(VisaCreateRequest::new(VisaType::Tourism))
    }

    #[tokio::test]
    async fn test_online_submit_is_sent() {
        let (base, server) = serve().await;
        let signal = ManualSignal::online();
        let app = app(&base, &signal);

        assert_eq!(app.submit(visa()).await.unwrap(), Submission::Sent);
        assert_eq!(server.visas.lock().unwrap().len(), 1);
        assert_eq!(app.queue().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_is_queued() {
        let (base, server) = serve().await;
        server.status.store(503, Ordering::SeqCst);
        let signal = ManualSignal::online();
        let app = app(&base, &signal);

        match app.submit(visa()).await.unwrap() {
            Submission::Queued(op) => assert_eq!(op.kind, SyncOperationKind::CreateVisa),
            other => panic!("expected queued, got {:?}", other),
        }
        assert_eq!(app.queue().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_returned() {
        let (base, server) = serve().await;
        server.status.store(400, Ordering::SeqCst);
        let signal = ManualSignal::online();
        let app = app(&base, &signal);

        let result = app.submit(visa()).await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(app.queue().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_visa_delivered_on_reconnect() {
        let (base, server) = serve().await;
        let signal = ManualSignal::offline();
        let app = app(&base, &signal);
        app.start().unwrap();

        assert!(matches!(app.submit(visa()).await.unwrap(), Submission::Queued(_)));
        assert!(server.visas.lock().unwrap().is_empty());

        signal.go_online();
        for _ in 0..100 {
            if app.queue().count().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        app.shutdown().await;

        assert_eq!(app.queue().count().await.unwrap(), 0);
        assert_eq!(*server.visas.lock().unwrap(), vec![json!({"tipo": "TURISMO"})]);
        assert!(!app.processor().is_listening());
    }

    #[tokio::test]
    async fn test_cached_profile_served_offline() {
        let (base, _server) = serve().await;
        let signal = ManualSignal::online();
        let app = app(&base, &signal);

        let online = app.profile_query().refresh().await;
        assert_eq!(online.phase, QueryPhase::Fresh);

        signal.go_offline();
        let offline = app.profile_query().refresh().await;
        assert_eq!(offline.phase, QueryPhase::Stale);
        assert!(!offline.is_stale);
        assert_eq!(offline.data.map(|c| c.first_name).as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn test_empty_offline_read() {
        let signal = ManualSignal::offline();
        let app = app("http://127.0.0.1:9", &signal);

        let state = app.profile_query().refresh().await;
        assert_eq!(state.phase, QueryPhase::Empty);
        assert!(state.data.is_none());
    }

    #[test]
    fn test_unknown_backend_fails_build() {
        let config = AppConfig {
            store: StoreConfig {
                backend: "cloud".to_string(),
                options: Value::Null,
            },
            ..AppConfig::default()
        };
        let result = App::build(
            config,
            Arc::new(ManualSignal::online()),
            Arc::new(StaticTokenProvider::default()),
        );
        assert!(result.is_err());
    }
}
